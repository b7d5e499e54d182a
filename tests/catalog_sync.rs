//! Catalog reconciliation through the public API: export linking by
//! natural key, claim-and-remove, and round-tripping an import.

use paysync::model::{BillingInterval, Price, Product, ProductKind};
use paysync::providers::test::MockCatalogClient;
use paysync::providers::{RemoteCatalog, RemotePrice, RemoteProduct};
use paysync::storage::test::InMemoryStore;
use paysync::{BillingStore, CatalogExporter, CatalogImporter, Provider, SyncOptions};

fn remote_product(id: &str, key: &str) -> RemoteProduct {
    RemoteProduct {
        provider_id: id.to_string(),
        key: Some(key.to_string()),
        name: "Pro".into(),
        summary: Some("The pro plan".into()),
        active: true,
    }
}

fn remote_price(
    id: &str,
    product_id: &str,
    keys: Option<(&str, &str)>,
    amount: i64,
) -> RemotePrice {
    RemotePrice {
        provider_id: id.to_string(),
        product_provider_id: product_id.to_string(),
        product_key: keys.map(|(p, _)| p.to_string()),
        price_key: keys.map(|(_, k)| k.to_string()),
        amount: Some(amount),
        currency: Some("USD".into()),
        interval: Some(BillingInterval::Month),
        interval_count: 1,
        active: true,
    }
}

#[tokio::test]
async fn export_preview_then_apply_links_by_natural_key() {
    let store = InMemoryStore::new();
    let product = Product::new("pro", "Pro", ProductKind::Subscription);
    let price = Price::new(&product.id, "monthly", BillingInterval::Month, "USD", 900);
    store.upsert_product(&product).await.unwrap();
    store.upsert_price(&price).await.unwrap();

    let client = MockCatalogClient::new(Provider::Stripe);
    client.seed(RemoteCatalog {
        products: vec![remote_product("prod_r", "pro")],
        prices: vec![remote_price("price_r", "prod_r", Some(("pro", "monthly")), 900)],
    });

    let exporter = CatalogExporter::new(store.clone(), client);

    let preview = exporter.preview(&SyncOptions::default()).await.unwrap();
    assert_eq!(preview.summary.prices.link, 1);
    assert!(preview.warnings.is_empty());
    assert!(store
        .get_price_mapping(&price.id, Provider::Stripe)
        .await
        .unwrap()
        .is_none());

    let applied = exporter.apply(&SyncOptions::default()).await.unwrap();
    assert_eq!(applied.summary.prices.link, 1);

    let mapping = store
        .get_price_mapping(&price.id, Provider::Stripe)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(mapping.provider_id, "price_r");
}

#[tokio::test]
async fn two_local_prices_never_claim_the_same_default_variant() {
    let store = InMemoryStore::new();
    let product = Product::new("pro", "Pro", ProductKind::Subscription);
    let monthly = Price::new(&product.id, "monthly", BillingInterval::Month, "USD", 900);
    let yearly = Price::new(&product.id, "yearly", BillingInterval::Year, "USD", 9000);
    store.upsert_product(&product).await.unwrap();
    store.upsert_price(&monthly).await.unwrap();
    store.upsert_price(&yearly).await.unwrap();

    let client = MockCatalogClient::new(Provider::LemonSqueezy);
    client.seed(RemoteCatalog {
        products: vec![remote_product("77", "pro")],
        // One unmapped auto-created default variant.
        prices: vec![remote_price("424", "77", None, 900)],
    });

    let exporter = CatalogExporter::new(store.clone(), client);
    let report = exporter.apply(&SyncOptions::default()).await.unwrap();

    assert_eq!(report.summary.prices.link, 1);
    assert_eq!(report.summary.prices.create, 1);

    let monthly_mapping = store
        .get_price_mapping(&monthly.id, Provider::LemonSqueezy)
        .await
        .unwrap()
        .unwrap();
    let yearly_mapping = store
        .get_price_mapping(&yearly.id, Provider::LemonSqueezy)
        .await
        .unwrap()
        .unwrap();
    assert_ne!(monthly_mapping.provider_id, yearly_mapping.provider_id);
}

#[tokio::test]
async fn import_then_export_round_trip_is_stable() {
    let store = InMemoryStore::new();
    let client = MockCatalogClient::new(Provider::Paddle);
    client.seed(RemoteCatalog {
        products: vec![remote_product("pro_r", "pro")],
        prices: vec![remote_price("pri_r", "pro_r", Some(("pro", "monthly")), 900)],
    });

    let importer = CatalogImporter::new(store.clone(), client.clone());
    let imported = importer.apply(&SyncOptions::default()).await.unwrap();
    assert_eq!(imported.summary.products.create, 1);
    assert_eq!(imported.summary.prices.create, 1);

    // Everything the import created is already mapped: an export run right
    // after finds nothing to do.
    let exporter = CatalogExporter::new(store.clone(), client);
    let exported = exporter.apply(&SyncOptions::default()).await.unwrap();
    assert_eq!(exported.summary.products.skip, 1);
    assert_eq!(exported.summary.prices.skip, 1);
    assert_eq!(exported.summary.products.create, 0);
    assert_eq!(exported.summary.prices.create, 0);
}
