use seeder_orchestration::{CustomerSpec, LineItemSpec, OrderSpec, RecordSpec, SeedBatch};

pub fn order(email: &str) -> OrderSpec {
    OrderSpec {
        customer: CustomerSpec {
            email: email.to_string(),
            first_name: None,
            last_name: None,
        },
        line_items: vec![LineItemSpec {
            sku: "TSHIRT-M".to_string(),
            quantity: 1,
        }],
        tags: vec!["seeded".to_string()],
    }
}

/// `n` records with original indices `0..n`
pub fn records(n: usize) -> Vec<RecordSpec> {
    SeedBatch::new(
        (0..n)
            .map(|i| order(&format!("customer{}@example.com", i)))
            .collect(),
    )
    .into_records()
}

/// External id the scripted order stage assigns to `original_index`
pub fn ext(original_index: usize) -> String {
    format!("gid://shop/Order/{}", 1000 + original_index)
}

/// Downstream id the scripted entity stage assigns to `original_index`
pub fn downstream(original_index: usize) -> String {
    format!("fo-{}", original_index)
}
