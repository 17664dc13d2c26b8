pub mod connection;
pub mod migrations;
pub mod sheet;

pub use connection::{connect, connect_with_config, connect_with_settings, ping, DbPool};
pub use sheet::{
    GoogleAuth, GoogleSheet, InMemorySheet, ServiceAccountKey, SheetBackend, SheetError,
    SpreadsheetLeadStore, SqliteSheet,
};
