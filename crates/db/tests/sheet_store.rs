use leadline_core::config::DatabaseConfig;
use leadline_core::lead::{LeadRecord, LeadStore};
use leadline_core::script::QuestionScript;
use leadline_db::{connect_with_config, migrations, SpreadsheetLeadStore, SqliteSheet};

fn record(values: &[&str]) -> LeadRecord {
    LeadRecord(values.iter().map(|value| (*value).to_owned()).collect())
}

async fn open_store(url: &str) -> SpreadsheetLeadStore<SqliteSheet> {
    let pool = connect_with_config(&DatabaseConfig {
        url: url.to_owned(),
        max_connections: 2,
        timeout_secs: 5,
    })
    .await
    .expect("connect");
    migrations::run_pending(&pool).await.expect("migrate");
    SpreadsheetLeadStore::new(
        SqliteSheet::new(pool, "Leads"),
        QuestionScript::lead_qualification().header(),
    )
}

#[tokio::test]
async fn leads_survive_reconnect_without_duplicate_header() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("leads.db").display());

    let first = open_store(&url).await;
    first.append(&record(&["Ada", "$5,000", "next week", "none"])).await.expect("first lead");
    drop(first);

    let second = open_store(&url).await;
    second.append(&record(&["Grace", "$9,000", "Q3", ""])).await.expect("second lead");

    let rows = second.backend().rows().await.expect("rows");
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0], vec!["Name", "Budget", "Timeline", "Notes"]);
    assert_eq!(rows[1][0], "Ada");
    assert_eq!(rows[2], vec!["Grace", "$9,000", "Q3", ""]);
}

#[tokio::test]
async fn changed_script_header_is_reinserted_above_old_rows() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("leads.db").display());

    let store = open_store(&url).await;
    store.append(&record(&["Ada", "1", "2", "3"])).await.expect("lead");

    let pool = connect_with_config(&DatabaseConfig { url, max_connections: 1, timeout_secs: 5 })
        .await
        .expect("connect");
    let renamed = SpreadsheetLeadStore::new(
        SqliteSheet::new(pool, "Leads"),
        vec!["Name".to_owned(), "Email".to_owned()],
    );
    renamed.append(&record(&["Grace", "grace@example.com"])).await.expect("lead");

    let rows = renamed.backend().rows().await.expect("rows");
    assert_eq!(rows[0], vec!["Name", "Email"]);
    assert_eq!(rows[1], vec!["Name", "Budget", "Timeline", "Notes"]);
    assert_eq!(rows.last().map(|row| row[0].as_str()), Some("Grace"));
}
