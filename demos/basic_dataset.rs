/// Basic Dataset Operations
///
/// This demo walks through:
/// - Declaring a schema with typed and computed columns
/// - Adding, updating, and removing rows
/// - Sorting and aggregating

use deltatable::*;

fn num_row(pairs: &[(&str, f64)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), Value::Number(*v)))
        .collect()
}

fn main() -> Result<()> {
    env_logger::init();
    println!("=== DeltaTable Basic Dataset Demo ===\n");

    // 1. Declare the schema
    println!("1. Creating dataset...");
    let orders = Dataset::new(DatasetOptions::default().with_columns(vec![
        ColumnSpec::typed("quantity", ValueType::Number),
        ColumnSpec::typed("price", ValueType::Number),
        ColumnSpec::typed("total", ValueType::Number).computed(|row| {
            let q = row.get("quantity").and_then(Value::as_f64).unwrap_or(0.0);
            let p = row.get("price").and_then(Value::as_f64).unwrap_or(0.0);
            Value::Number(q * p)
        }),
    ]));
    println!("   Columns: {:?}\n", orders.column_names());

    // 2. Add rows
    println!("2. Adding rows...");
    let ids = orders.add(
        vec![
            num_row(&[("quantity", 10.0), ("price", 9.99)]),
            num_row(&[("quantity", 5.0), ("price", 19.99)]),
            num_row(&[("quantity", 15.0), ("price", 4.99)]),
        ],
        MutationOptions::default(),
    )?;
    println!("   Added {} rows\n", ids.len());

    // 3. Query
    println!("3. Querying...");
    orders.each(|row, pos| {
        println!(
            "   Row {}: quantity={} price={} total={}",
            pos,
            row.get("quantity").unwrap(),
            row.get("price").unwrap(),
            row.get("total").unwrap()
        );
    });
    println!();

    // 4. Update a row; the computed column follows
    println!("4. Updating the first row...");
    let mut change = num_row(&[("quantity", 12.0)]);
    change.insert(DEFAULT_ID_ATTRIBUTE.to_string(), ids[0].to_value());
    orders.update(change, MutationOptions::default())?;
    println!("   total is now {}\n", orders.get_value(0, "total").unwrap());

    // 5. Sort by total descending
    println!("5. Sorting by total, descending...");
    orders.sort(Some(std::rc::Rc::new(|a: &Row, b: &Row| {
        b.get("total")
            .and_then(Value::as_f64)
            .partial_cmp(&a.get("total").and_then(Value::as_f64))
            .unwrap_or(std::cmp::Ordering::Equal)
    })))?;
    orders.each(|row, pos| {
        println!("   Row {}: total={}", pos, row.get("total").unwrap());
    });
    println!();

    // 6. Aggregate
    println!("6. Aggregating...");
    println!(
        "   sum(total) = {}",
        orders.aggregate(&["total"], AggregateMethod::Sum)?
    );
    println!(
        "   mean(quantity) = {}",
        orders.aggregate(&["quantity"], AggregateMethod::Mean)?
    );

    // 7. Remove cheap orders
    println!("\n7. Removing rows with total < 100...");
    let removed = orders.remove(
        RowFilter::predicate(|row| {
            row.get("total").and_then(Value::as_f64).unwrap_or(0.0) < 100.0
        }),
        MutationOptions::default(),
    )?;
    println!("   Removed {} rows, {} remain", removed, orders.len());

    Ok(())
}
