use mongopipe_compiler::SqlCompiler;

fn main() {
    let sql = std::env::args().nth(1).unwrap_or_else(|| {
        "SELECT city, count(*) AS cnt FROM donors GROUP BY city ORDER BY cnt DESC LIMIT 10"
            .to_string()
    });

    match SqlCompiler::new().compile(&sql, &[]) {
        Ok(plan) => {
            println!("collection: {}", plan.collection);
            match plan.method {
                Some(method) => println!("method: {}", method.as_str()),
                None => println!("method: none"),
            }
            for stage in plan.pipeline() {
                println!("{stage}");
            }
        }
        Err(e) => println!("Error: {e}"),
    }
}
