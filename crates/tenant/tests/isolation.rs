use bistro_tenant::memory::{MemoryCluster, MemoryNamespaceAdmin, MemoryPoolFactory, MemoryTenantStore};
use bistro_tenant::{RequestScope, Tenancy, TenancyConfig, TenantError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

async fn tenancy(
    cluster: Arc<MemoryCluster>,
    max_connections: usize,
) -> (Arc<Tenancy<MemoryPoolFactory>>, Arc<MemoryPoolFactory>) {
    let factory = Arc::new(MemoryPoolFactory::new(cluster, max_connections));
    let tenancy = Tenancy::new(
        TenancyConfig {
            max_connections_per_pool: max_connections as u32,
            checkout_timeout: Duration::from_millis(200),
            ..Default::default()
        },
        Arc::new(MemoryTenantStore::new()),
        Arc::new(MemoryNamespaceAdmin::new()),
        factory.clone(),
    )
    .unwrap();
    tenancy.create_tenant("Acme Corp", "acme").await.unwrap();
    tenancy.create_tenant("Beta Bistro", "beta").await.unwrap();
    (Arc::new(tenancy), factory)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_tenants_never_see_each_other() {
    let cluster = Arc::new(MemoryCluster::new());
    cluster.seed("tenant_acme", "acme-order");
    cluster.seed("tenant_beta", "beta-order");
    let (tenancy, factory) = tenancy(cluster, 3).await;

    let mut handles = Vec::new();
    for i in 0..200 {
        let tenancy = tenancy.clone();
        let slug = if i % 2 == 0 { "acme" } else { "beta" };
        handles.push(tokio::spawn(async move {
            tenancy
                .isolation()
                .run_scoped(Some(slug), RequestScope::default(), |ctx| async move {
                    tokio::task::yield_now().await;
                    let rows = ctx.connection().await?.fetch_rows();
                    Ok::<_, TenantError>((ctx.tenant().slug.clone(), rows))
                })
                .await
        }));
    }

    for handle in handles {
        let (slug, rows) = handle.await.unwrap().unwrap();
        assert_eq!(rows, vec![format!("{}-order", slug)]);
    }
    assert_eq!(factory.checkouts(), 200);
    assert_eq!(factory.releases(), 200);
}

#[derive(Debug, Clone, Copy)]
enum Fault {
    Success,
    Error,
    Timeout,
    Cancel,
    Panic,
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_checkout_is_released_once() {
    let (tenancy, factory) = tenancy(Arc::new(MemoryCluster::new()), 2).await;
    let mut rng = StdRng::seed_from_u64(0x5eed);

    let mut handles = Vec::new();
    for _ in 0..120 {
        let fault = match rng.gen_range(0..5) {
            0 => Fault::Success,
            1 => Fault::Error,
            2 => Fault::Timeout,
            3 => Fault::Cancel,
            _ => Fault::Panic,
        };
        let slug = if rng.gen_bool(0.5) { "acme" } else { "beta" };
        let work = Duration::from_millis(rng.gen_range(0..5));
        let tenancy = tenancy.clone();

        handles.push(tokio::spawn(async move {
            let cancel = CancellationToken::new();
            let mut scope = RequestScope::new(cancel.clone());
            match fault {
                Fault::Timeout => scope = scope.with_timeout(Duration::from_millis(2)),
                Fault::Cancel => {
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(1)).await;
                        cancel.cancel();
                    });
                }
                _ => {}
            }

            tenancy
                .isolation()
                .run_scoped(Some(slug), scope, |ctx| async move {
                    let _conn = ctx.connection().await?;
                    match fault {
                        Fault::Error => Err(TenantError::Backend("injected".into())),
                        Fault::Panic => panic!("injected panic"),
                        Fault::Timeout | Fault::Cancel => {
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok(())
                        }
                        Fault::Success => {
                            tokio::time::sleep(work).await;
                            Ok(())
                        }
                    }
                })
                .await
        }));
    }

    for handle in handles {
        // Panics, errors, timeouts and cancellations are all expected outcomes
        let _ = handle.await;
    }

    assert!(factory.checkouts() > 0);
    assert_eq!(factory.checkouts(), factory.releases());

    // Both pools are whole again
    let ctx_a = tenancy.bind_request(Some("acme"), RequestScope::default()).await.unwrap();
    let ctx_b = tenancy.bind_request(Some("acme"), RequestScope::default()).await.unwrap();
    ctx_a.release().await;
    ctx_b.release().await;
    assert_eq!(factory.checkouts(), factory.releases());
}
