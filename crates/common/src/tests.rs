use super::*;
use std::io;

#[test]
fn config_defaults_are_sane() {
    let cfg = Config::default();
    assert_eq!(cfg.page_size, 4096);
    assert_eq!(cfg.buffer_pool_pages, 500);
}

#[test]
fn db_error_formats_cleanly() {
    let err = DbError::Storage("corruption".into());
    assert!(format!("{err}").contains("storage"));
}

#[test]
fn io_error_converts() {
    let e = io::Error::other("oops");
    let db_err: DbError = e.into();
    assert!(matches!(db_err, DbError::Io(_)));
}

#[test]
fn record_id_equality_is_structural() {
    let a = RecordId {
        page_id: PageId(1),
        slot: 2,
    };
    let b = RecordId {
        page_id: PageId(1),
        slot: 2,
    };
    assert_eq!(a, b);
}
