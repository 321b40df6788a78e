//! Demo sales database: products, customers and their orders

use crate::{Database, DuckError};
use duckdb::params;

const SCHEMA: &str = "
    CREATE OR REPLACE TABLE Products (
        ProductID INTEGER PRIMARY KEY,
        ProductName VARCHAR NOT NULL,
        Category VARCHAR NOT NULL,
        Price DOUBLE NOT NULL,
        StockQuantity INTEGER NOT NULL
    );
    CREATE OR REPLACE TABLE Customers (
        CustomerID INTEGER PRIMARY KEY,
        FullName VARCHAR NOT NULL,
        Email VARCHAR NOT NULL,
        Country VARCHAR NOT NULL,
        JoinDate DATE NOT NULL
    );
    CREATE OR REPLACE TABLE Orders (
        OrderID INTEGER PRIMARY KEY,
        CustomerID INTEGER,
        ProductID INTEGER,
        OrderDate DATE NOT NULL,
        Quantity INTEGER NOT NULL,
        TotalAmount DOUBLE NOT NULL
    );
";

const PRODUCTS: [(i32, &str, &str, f64, i32); 8] = [
    (1, "Laptop Pro X", "Electronics", 1200.00, 50),
    (2, "Smartphone Z", "Electronics", 800.00, 100),
    (3, "Noise Cancelling Headphones", "Audio", 250.00, 200),
    (4, "Ergonomic Chair", "Furniture", 300.00, 30),
    (5, "Running Shoes", "Apparel", 120.00, 75),
    (6, "Coffee Maker", "Appliances", 80.00, 60),
    (7, "4K Monitor", "Electronics", 400.00, 40),
    (8, "Mechanical Keyboard", "Electronics", 150.00, 80),
];

const CUSTOMERS: [(i32, &str, &str, &str, &str); 5] = [
    (101, "Alice Smith", "alice@example.com", "USA", "2023-01-15"),
    (102, "Bob Jones", "bob@test.com", "UK", "2023-02-20"),
    (103, "Charlie Brown", "charlie@domain.com", "Canada", "2023-03-10"),
    (104, "Diana Prince", "diana@themyscira.com", "Greece", "2023-04-05"),
    (105, "Evan Wright", "evan@writes.com", "Australia", "2023-05-12"),
];

pub const ORDER_COUNT: usize = 20;

/// Create (or replace) the demo tables and fill them.
///
/// Orders are spread over customers, products and 2023 dates by a fixed
/// stride, so every seeding produces the same rows.
pub fn seed(db: &Database) -> Result<(), DuckError> {
    let conn = db.connect()?;
    conn.execute_batch(SCHEMA)?;

    for (id, name, category, price, stock) in PRODUCTS {
        conn.execute(
            "INSERT INTO Products VALUES (?, ?, ?, ?, ?)",
            params![id, name, category, price, stock],
        )?;
    }

    for (id, name, email, country, joined) in CUSTOMERS {
        conn.execute(
            "INSERT INTO Customers VALUES (?, ?, ?, ?, CAST(? AS DATE))",
            params![id, name, email, country, joined],
        )?;
    }

    for i in 0..ORDER_COUNT {
        let (customer_id, ..) = CUSTOMERS[(i * 3) % CUSTOMERS.len()];
        let (product_id, _, _, price, _) = PRODUCTS[(i * 5 + 1) % PRODUCTS.len()];
        let quantity = (i % 3) as i32 + 1;
        let ordered = format!("2023-{:02}-{}", (i * 7) % 9 + 1, (i * 11) % 19 + 10);

        conn.execute(
            "INSERT INTO Orders VALUES (?, ?, ?, CAST(? AS DATE), ?, ?)",
            params![
                1001 + i as i32,
                customer_id,
                product_id,
                ordered,
                quantity,
                price * f64::from(quantity)
            ],
        )?;
    }

    tracing::info!(database = %db.location(), orders = ORDER_COUNT, "Seeded demo database");
    Ok(())
}
