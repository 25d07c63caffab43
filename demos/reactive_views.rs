/// Reactive Views
///
/// This demo wires a syncable dataset to a filtered view, a group-by
/// derived table, and a live scalar product, then mutates the dataset and
/// watches everything stay consistent.

use deltatable::*;

fn num_row(pairs: &[(&str, f64)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), Value::Number(*v)))
        .collect()
}

fn main() -> Result<()> {
    env_logger::init();
    println!("=== DeltaTable Reactive Views Demo ===\n");

    let readings = Dataset::new(DatasetOptions {
        syncable: true,
        ..DatasetOptions::default().with_columns(vec![
            ColumnSpec::typed("sensor", ValueType::Number),
            ColumnSpec::typed("value", ValueType::Number),
        ])
    });

    // A view of the hot readings, kept in sync by delta propagation.
    let hot = readings.select_rows(RowFilter::predicate(|row| {
        row.get("value").and_then(Value::as_f64).unwrap_or(0.0) > 50.0
    }))?;
    hot.hub().subscribe(topic::DELETE, |event: &Event| {
        for delta in &event.deltas {
            println!("   [view] reading {} cooled off, dropped", delta.id);
        }
    });

    // A derived table recomputed wholesale on every change.
    let per_sensor = Derived::group_by(
        &readings,
        GroupBy::new("sensor", &["value"]).with_method(AggregateMethod::Mean),
    )?;

    // A live scalar.
    let peak = Product::max(&readings, &["value"])?
        .live()
        .expect("syncable parent yields a live product");
    peak.on_change(|change| {
        println!("   [product] peak moved {} -> {}", change.old, change.new);
    });

    println!("1. Loading readings...");
    let ids = readings.add(
        vec![
            num_row(&[("sensor", 1.0), ("value", 40.0)]),
            num_row(&[("sensor", 1.0), ("value", 60.0)]),
            num_row(&[("sensor", 2.0), ("value", 80.0)]),
        ],
        MutationOptions::default(),
    )?;
    println!(
        "   dataset={} hot={} sensors={} peak={}\n",
        readings.len(),
        hot.len(),
        per_sensor.len(),
        peak.val()
    );

    println!("2. A hot reading cools down...");
    let mut change = num_row(&[("value", 10.0)]);
    change.insert(DEFAULT_ID_ATTRIBUTE.to_string(), ids[1].to_value());
    readings.update(change, MutationOptions::default())?;
    println!("   hot view now holds {} rows\n", hot.len());

    println!("3. A new spike arrives...");
    readings.add_row(
        num_row(&[("sensor", 2.0), ("value", 95.0)]),
        MutationOptions::default(),
    )?;
    println!(
        "   hot={} peak={} sensor-2 mean={}",
        hot.len(),
        peak.val(),
        per_sensor.get_value(1, "value").unwrap()
    );

    Ok(())
}
