//! # fdb-engine 使用案例
//!
//! 1. 定义表结构并准备行数据
//! 2. 构建 `.fdb` 文件（临时文件 + 改名）
//! 3. 打开文件，按键查找、按字符串键查找、全表扫描

use fdb_engine::{
    write_file, Builder, FdbError, MemoryRowProvider, Reader, TableDef, Value, Variant,
};

fn main() -> fdb_engine::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // =========================================================================
    // 1. 表结构与数据
    // =========================================================================
    let accounts = TableDef::new("Accounts")
        .with_column("id", Variant::Uint32)
        .with_column("name", Variant::NVarChar)
        .with_column("age", Variant::Uint32)
        .with_column("active", Variant::Bool);
    let locales = TableDef::new("Locales")
        .with_column("code", Variant::Text)
        .with_column("population", Variant::Int64);

    let mut provider = MemoryRowProvider::new()
        .with_rows("Accounts", vec![
            vec![0u32.into(), "Alice".into(), 20u32.into(), true.into()],
            vec![1u32.into(), "Bob".into(), 21u32.into(), true.into()],
            vec![2u32.into(), "Carol".into(), 35u32.into(), false.into()],
        ])
        .with_rows("Locales", vec![
            vec![Value::Text("en_US".into()), Value::Int64(331_000_000)],
            vec![Value::Text("de_DE".into()), Value::Int64(83_000_000)],
        ]);

    // =========================================================================
    // 2. 构建
    // =========================================================================
    let dir = std::env::temp_dir().join("fdb-engine-demo");
    std::fs::create_dir_all(&dir).map_err(FdbError::io("cannot create demo dir"))?;
    let path = dir.join(format!("demo.{}", fdb_engine::FILE_EXTENSION));

    let builder = Builder::new(vec![locales, accounts]);
    let bytes = write_file(&path, &builder, &mut provider)?;
    println!("wrote {} ({bytes} bytes)", path.display());

    // =========================================================================
    // 3. 读取
    // =========================================================================
    let reader = Reader::open(&path)?;
    for table in reader.tables() {
        let cols: Vec<String> = table.columns().iter()
            .map(|c| format!("{}:{}", c.name, c.variant))
            .collect();
        println!("table {} ({})", table.name(), cols.join(", "));
    }

    let accounts = reader.table("Accounts")?;
    let alice = accounts.find(0)?;
    println!(
        "find(0) → name={} age={} active={}",
        alice.column(1).map(|e| e.as_string()).transpose()?.unwrap_or_default(),
        alice.column(2).map(|e| e.as_u32()).transpose()?.unwrap_or_default(),
        alice.column(3).map(|e| e.as_bool()).transpose()?.unwrap_or_default(),
    );
    match accounts.find(7) {
        Err(e) if e.is_not_found() => println!("find(7) → not found"),
        other => println!("find(7) → {other:?}"),
    }

    let locales = reader.table("Locales")?;
    let de = locales.find_str("de_DE")?;
    println!("de_DE population = {}", de.column(1).map(|e| e.as_i64()).transpose()?.unwrap_or_default());

    for row in accounts.rows() {
        let values: Vec<String> = row?.values()?.iter().map(Value::to_string).collect();
        println!("  [{}]", values.join(", "));
    }
    Ok(())
}
