//! Enumerate, trace and sample binary strings.
//!
//! Run with:
//! ```sh
//! RUST_LOG=atlas_engine=debug cargo run -p atlas-engine --example binary_strings
//! ```

use atlas_engine::{FrequencyModel, Generator, GreedyStrategy, StrategyHandle, Value};
use tracing_subscriber::EnvFilter;

const SOURCE: &str = r#"@generator(name="bits")
fn bits(length) {
    let s = "";
    for i in range(length) {
        s += Select(["0", "1"], oid="digit");
    }
    return s;
}"#;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let bits = Generator::from_source("bits.atlas", SOURCE)?;

    println!("== all strings of length 3 (dfs)");
    for value in bits.generate(vec![Value::from(3)])? {
        println!("{}", value?);
    }

    println!("\n== traces of length 2");
    let mut traces = Vec::new();
    for run in bits.trace(vec![Value::from(2)])? {
        let (value, trace) = run?;
        let choices: Vec<String> = trace.choices().iter().map(|c| c.to_string()).collect();
        println!("{} <- [{}]", value, choices.join(", "));
        if value == Value::from("11") || value == Value::from("10") {
            traces.push(trace);
        }
    }

    println!("\n== greedy after training on \"11\" and \"10\"");
    let mut model = FrequencyModel::new();
    bits.train(&traces, &mut model)?;
    bits.set_strategy(StrategyHandle::new(GreedyStrategy::new(model)), true);
    println!("{}", bits.call(vec![Value::from(4)])?);

    println!("\n== five random strings of length 8");
    bits.set_strategy_name("randomized", true)?;
    for value in bits.generate(vec![Value::from(8)])?.take(5) {
        println!("{}", value?);
    }

    Ok(())
}
