mod common;

use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

use storefront_orders::{
    CatalogRepository, HookError, HookResult, NewProduct, NotifyError, PostgresUnitOfWork,
    StoreError, StockChange, TransactionAware, UnitOfWork, UnitOfWorkSession,
};

use common::{cleanup_database, reload_product, seed_product, setup_database, TrackingObserver};

fn new_product(slug: &str, stock: u32) -> NewProduct {
    NewProduct {
        name: "Linen sofa".to_string(),
        slug: slug.to_string(),
        base_price: dec!(999.00),
        discount_percent: 0,
        stock,
        available: true,
    }
}

struct FailingHook;

#[async_trait::async_trait]
impl TransactionAware for FailingHook {
    async fn on_commit(&self) -> HookResult {
        Err(HookError::Notify(NotifyError::QueueClosed))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
#[serial_test::serial]
async fn test_commit_persists_and_notifies_observers() {
    let pool = setup_database().await;
    let uow = PostgresUnitOfWork::new(pool.clone());

    let session = uow.begin().await.expect("Failed to begin transaction");
    let catalog = CatalogRepository::new(session.executor().clone());
    let observer = TrackingObserver::new();
    session.register_transaction_aware(observer.clone());

    let product = catalog
        .insert(&new_product("linen-sofa", 4))
        .await
        .expect("Failed to insert product");

    let found = catalog
        .find_by_id(product.id)
        .await
        .expect("Failed to find product")
        .expect("Product not visible inside its own transaction");
    assert_eq!(found.name, "Linen sofa");

    session.commit().await.expect("Failed to commit transaction");

    assert!(observer.is_committed(), "Observer should see the commit");
    assert!(!observer.is_rolled_back(), "Observer should not see a rollback");

    let persisted = reload_product(&pool, product.id).await;
    assert_eq!(persisted.stock, 4);

    cleanup_database(&pool).await;
    pool.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
#[serial_test::serial]
async fn test_rollback_discards_stock_changes() {
    let pool = setup_database().await;
    let product = seed_product(&pool, "Rattan chair", dec!(120.00), 10).await;
    let uow = PostgresUnitOfWork::new(pool.clone());

    let session = uow.begin().await.expect("Failed to begin transaction");
    let catalog = CatalogRepository::new(session.executor().clone());
    let observer = TrackingObserver::new();
    session.register_transaction_aware(observer.clone());

    let updated = catalog
        .apply_stock_changes(&[StockChange {
            product_id: product.id,
            quantity: 3,
        }])
        .await
        .expect("Failed to apply stock change");
    assert_eq!(updated, 1);

    session.rollback().await.expect("Failed to rollback transaction");

    assert!(!observer.is_committed(), "Observer should not see a commit");
    assert!(observer.is_rolled_back(), "Observer should see the rollback");

    let after = reload_product(&pool, product.id).await;
    assert_eq!(after.stock, 10);
    assert_eq!(after.purchase_count, 0);

    cleanup_database(&pool).await;
    pool.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
#[serial_test::serial]
async fn test_failing_hook_does_not_undo_commit() {
    let pool = setup_database().await;
    let uow = PostgresUnitOfWork::new(pool.clone());

    let session = uow.begin().await.expect("Failed to begin transaction");
    let catalog = CatalogRepository::new(session.executor().clone());
    session.register_transaction_aware(Arc::new(FailingHook));

    let product = catalog
        .insert(&new_product("hook-sofa", 2))
        .await
        .expect("Failed to insert product");

    session
        .commit()
        .await
        .expect("Commit should succeed even when a hook fails");

    assert_eq!(reload_product(&pool, product.id).await.stock, 2);

    cleanup_database(&pool).await;
    pool.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
#[serial_test::serial]
async fn test_executor_is_closed_after_commit() {
    let pool = setup_database().await;
    let uow = PostgresUnitOfWork::new(pool.clone());

    let session = uow.begin().await.expect("Failed to begin transaction");
    let catalog = CatalogRepository::new(session.executor().clone());
    session.commit().await.expect("Failed to commit transaction");

    let result = catalog.available().await;
    assert!(
        matches!(result, Err(StoreError::TransactionClosed)),
        "Repositories must not outlive their unit of work"
    );

    cleanup_database(&pool).await;
    pool.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
#[serial_test::serial]
async fn test_lock_timeout_is_transient() {
    let pool = setup_database().await;
    let product = seed_product(&pool, "Pine shelf", dec!(80.00), 3).await;

    let holder = PostgresUnitOfWork::new(pool.clone())
        .begin()
        .await
        .expect("Failed to begin holder transaction");
    CatalogRepository::new(holder.executor().clone())
        .lock_by_ids(&[product.id])
        .await
        .expect("Failed to lock product");

    let waiter = PostgresUnitOfWork::new(pool.clone())
        .with_lock_timeout(Duration::from_millis(100))
        .begin()
        .await
        .expect("Failed to begin waiting transaction");
    let error = CatalogRepository::new(waiter.executor().clone())
        .lock_by_ids(&[product.id])
        .await
        .expect_err("Second locker should time out");

    assert!(error.is_transient(), "Lock timeout should be transient, got {error:?}");

    waiter.rollback().await.expect("Failed to rollback waiter");
    holder.rollback().await.expect("Failed to rollback holder");

    cleanup_database(&pool).await;
    pool.close().await;
}
