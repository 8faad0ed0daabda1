mod common;

use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use uuid::Uuid;

use storefront_orders::{
    CatalogRepository, PostgresUnitOfWork, StockChange, StoreError, UnitOfWork,
    UnitOfWorkSession,
};

use common::{cleanup_database, reload_product, seed_product, setup_database};

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
#[serial_test::serial]
async fn test_locking_read_returns_rows_in_id_order() {
    let pool = setup_database().await;
    let a = seed_product(&pool, "Side table", dec!(70.00), 2).await;
    let b = seed_product(&pool, "Bookcase", dec!(240.00), 1).await;
    let c = seed_product(&pool, "Footstool", dec!(55.00), 6).await;
    let uow = PostgresUnitOfWork::new(pool.clone());

    let session = uow.begin().await.expect("Failed to begin transaction");
    let catalog = CatalogRepository::new(session.executor().clone());

    let missing = Uuid::new_v4();
    let locked = catalog
        .lock_by_ids(&[c.id, a.id, missing, b.id, a.id])
        .await
        .expect("Failed to lock products");

    let mut expected = vec![a.id, b.id, c.id];
    expected.sort();
    let ids: Vec<Uuid> = locked.iter().map(|product| product.id).collect();
    assert_eq!(ids, expected, "Locked rows come back once each, sorted by id");

    session.rollback().await.expect("Failed to rollback");

    cleanup_database(&pool).await;
    pool.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
#[serial_test::serial]
async fn test_stock_cannot_go_negative() {
    let pool = setup_database().await;
    let product = seed_product(&pool, "Mirror", dec!(90.00), 2).await;
    let uow = PostgresUnitOfWork::new(pool.clone());

    let session = uow.begin().await.expect("Failed to begin transaction");
    let catalog = CatalogRepository::new(session.executor().clone());

    let result = catalog
        .apply_stock_changes(&[StockChange {
            product_id: product.id,
            quantity: 3,
        }])
        .await;
    assert!(
        matches!(result, Err(StoreError::Database(_))),
        "The stock check constraint must reject an oversell"
    );

    session.rollback().await.expect("Failed to rollback");
    assert_eq!(reload_product(&pool, product.id).await.stock, 2);

    cleanup_database(&pool).await;
    pool.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
#[serial_test::serial]
async fn test_set_pricing_recomputes_final_price() {
    let pool = setup_database().await;
    let product = seed_product(&pool, "Velvet ottoman", dec!(200.00), 4).await;
    let uow = PostgresUnitOfWork::new(pool.clone());

    let session = uow.begin().await.expect("Failed to begin transaction");
    let catalog = CatalogRepository::new(session.executor().clone());

    let discounted = catalog
        .set_pricing(product.id, dec!(250.00), 20)
        .await
        .expect("Failed to set pricing")
        .expect("Product not found");
    assert_eq!(discounted.final_price, dec!(200.00));
    assert_eq!(discounted.old_price(), Some(dec!(250.00)));

    let missing = catalog
        .set_pricing(Uuid::new_v4(), dec!(1.00), 0)
        .await
        .expect("Failed to set pricing");
    assert!(missing.is_none());

    session.commit().await.expect("Failed to commit");

    cleanup_database(&pool).await;
    pool.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
#[serial_test::serial]
async fn test_named_catalog_queries() {
    let pool = setup_database().await;
    let regular = seed_product(&pool, "Plain stool", dec!(30.00), 5).await;
    let on_sale = seed_product(&pool, "Sale stool", dec!(40.00), 5).await;
    let sold_out = seed_product(&pool, "Sold out stool", dec!(50.00), 0).await;
    let uow = PostgresUnitOfWork::new(pool.clone());

    let session = uow.begin().await.expect("Failed to begin transaction");
    let catalog = CatalogRepository::new(session.executor().clone());
    catalog
        .set_pricing(on_sale.id, dec!(40.00), 25)
        .await
        .expect("Failed to discount product");

    let available: Vec<Uuid> = catalog
        .available()
        .await
        .expect("Failed to list available products")
        .into_iter()
        .map(|product| product.id)
        .collect();
    assert!(available.contains(&regular.id));
    assert!(available.contains(&on_sale.id));
    assert!(!available.contains(&sold_out.id), "Zero stock is not available");

    let sale: Vec<Uuid> = catalog
        .on_sale()
        .await
        .expect("Failed to list sale products")
        .into_iter()
        .map(|product| product.id)
        .collect();
    assert_eq!(sale, vec![on_sale.id]);

    let recent = catalog
        .new_arrivals(Utc::now() - Duration::days(30))
        .await
        .expect("Failed to list new arrivals");
    assert_eq!(recent.len(), 2);

    let none = catalog
        .new_arrivals(Utc::now() + Duration::days(1))
        .await
        .expect("Failed to list new arrivals");
    assert!(none.is_empty());

    session.commit().await.expect("Failed to commit");

    cleanup_database(&pool).await;
    pool.close().await;
}
