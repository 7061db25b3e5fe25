//! # Unit-of-Work Tests
//!
//! Commit, rollback and panic handling through `Engine`, first against the
//! counting mock driver and then end to end on SQLite.

mod common;

use common::{MockDriver, MockStats};
use eyre::bail;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use txsession::{record, Engine, Value};

#[test]
fn test_successful_unit_commits_once() {
    let driver = MockDriver::new(2);
    let stats = Arc::clone(&driver.stats);
    let engine = Engine::new(driver);

    let outcome = engine.with_transaction(
        |s| {
            s.execute("update t set a = 1", ())?;
            s.query_all("select * from t", ())?;
            Ok(())
        },
        (),
    );

    assert!(outcome.success);
    assert!(outcome.error.is_none());
    assert!(outcome.panic.is_none());
    assert_eq!(MockStats::get(&stats.connects), 1);
    assert_eq!(MockStats::get(&stats.commits), 1);
    assert_eq!(MockStats::get(&stats.rollbacks), 0);
    assert_eq!(MockStats::get(&stats.connection_closes), 1);
}

#[test]
fn test_failing_unit_rolls_back_once() {
    let driver = MockDriver::new(2);
    let stats = Arc::clone(&driver.stats);
    let engine = Engine::new(driver);

    let outcome = engine.with_transaction(
        |s| {
            s.execute("update t set a = 1", ())?;
            bail!("business rule violated");
        },
        (),
    );

    assert!(!outcome.success);
    let error = outcome.error.as_ref().unwrap();
    assert!(format!("{:#}", error).contains("business rule violated"));
    assert_eq!(MockStats::get(&stats.commits), 0);
    assert_eq!(MockStats::get(&stats.rollbacks), 1);
    assert_eq!(MockStats::get(&stats.connection_closes), 1);
}

#[test]
fn test_panicking_unit_rolls_back_and_reports_panic() {
    let driver = MockDriver::new(5);
    let stats = Arc::clone(&driver.stats);
    let engine = Engine::new(driver);

    let outcome = engine.with_transaction(
        |s| {
            let mut stream = s.query("select * from t", ())?;
            stream.next();
            panic!("boom");
        },
        (),
    );

    assert!(!outcome.success);
    assert!(outcome.error.is_none());
    assert_eq!(outcome.panic.as_deref(), Some("boom"));
    assert_eq!(MockStats::get(&stats.rollbacks), 1);
    assert_eq!(MockStats::get(&stats.commits), 0);
    assert_eq!(MockStats::get(&stats.cursor_closes), 1);
    assert_eq!(MockStats::get(&stats.statement_closes), 1);
    assert_eq!(MockStats::get(&stats.connection_closes), 1);
}

#[test]
fn test_transaction_resumes_panic_after_cleanup() {
    let driver = MockDriver::new(0);
    let stats = Arc::clone(&driver.stats);
    let engine = Engine::new(driver);

    let caught = panic::catch_unwind(AssertUnwindSafe(|| {
        engine.transaction(|_| -> eyre::Result<()> { panic!("inner") })
    }));

    assert!(caught.is_err());
    assert_eq!(MockStats::get(&stats.rollbacks), 1);
    assert_eq!(MockStats::get(&stats.connection_closes), 1);
}

#[test]
fn test_seeded_attributes_and_result() {
    let engine = Engine::new(MockDriver::new(0));

    let outcome = engine.with_transaction(
        |s| {
            let user = s.attribute("user");
            assert_eq!(user, Some(Value::from("bob")));
            s.set_result(format!("hello {}", user.map(|v| v.display_string()).unwrap_or_default()));
            Ok(())
        },
        record! { "user" => "bob" },
    );

    assert!(outcome.success);
    assert_eq!(outcome.result, Some(Value::from("hello bob")));
    assert_eq!(outcome.into_result().unwrap(), Some(Value::from("hello bob")));
}

#[test]
fn test_result_survives_failure() {
    let engine = Engine::new(MockDriver::new(0));

    let outcome = engine.with_transaction(
        |s| {
            s.set_result(7);
            bail!("late failure");
        },
        (),
    );

    assert!(!outcome.success);
    assert_eq!(outcome.result, Some(Value::Int(7)));
    assert!(outcome.into_result().is_err());
}

#[test]
fn test_session_values_share_the_unit() {
    let engine = Engine::new(MockDriver::new(0));

    engine
        .transaction(|s| {
            let called = Cell::new(false);
            let none = s.bind(|_, _| {
                called.set(true);
                Ok(1)
            })?;
            assert!(none.is_none());
            assert!(!called.get());

            let five = s.monad(5);
            let ten = five.bind(|v, _| Ok(v * 2))?.unwrap();
            assert_eq!(ten.value(), Some(&10));
            assert_eq!(ten.tx_id(), s.tx_id());

            let len = s.fmap("abc", |start, _| Ok(start.len()))?;
            assert_eq!(len.value(), Some(&3));
            assert_eq!(len.map(|n| n + 1).into_value(), Some(4));
            assert_eq!(len.tx_id(), s.tx_id());
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_distinct_units_get_distinct_ids() {
    let engine = Engine::new(MockDriver::new(0));
    let first = engine.transaction(|s| Ok(s.tx_id())).unwrap();
    let second = engine.transaction(|s| Ok(s.tx_id())).unwrap();
    assert_ne!(first, second);
}

#[test]
fn test_nested_unit_on_same_thread_does_not_block() {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let driver = MockDriver::new(0);
        let stats = Arc::clone(&driver.stats);
        let engine = Engine::new(driver);
        let outer = engine.transaction(|_| engine.transaction(|_| Ok(1)));
        let _ = tx.send((outer.map_err(|e| e.to_string()), stats));
    });

    let (outer, stats) = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("nested unit did not finish");
    assert_eq!(outer, Ok(1));
    assert_eq!(MockStats::get(&stats.connects), 2);
    assert_eq!(MockStats::get(&stats.commits), 2);
    assert_eq!(MockStats::get(&stats.connection_closes), 2);
}

#[test]
fn test_cleanup_failures_keep_the_action_error() {
    let driver = MockDriver::new(0).fail_rollback().fail_close();
    let stats = Arc::clone(&driver.stats);
    let engine = Engine::new(driver);

    let outcome = engine.with_transaction(|_| bail!("original failure"), ());

    assert!(!outcome.success);
    let message = format!("{:#}", outcome.error.as_ref().unwrap());
    assert!(message.contains("original failure"), "{}", message);
    assert!(!message.contains("rollback"), "{}", message);
    assert_eq!(MockStats::get(&stats.rollbacks), 1);
    assert_eq!(MockStats::get(&stats.connection_closes), 1);
}

#[test]
fn test_cleanup_failures_keep_the_panic() {
    let driver = MockDriver::new(0).fail_rollback().fail_close();
    let stats = Arc::clone(&driver.stats);
    let engine = Engine::new(driver);

    let outcome = engine.with_transaction(|_| panic!("kaboom"), ());

    assert!(outcome.error.is_none());
    assert_eq!(outcome.panic.as_deref(), Some("kaboom"));
    assert_eq!(MockStats::get(&stats.rollbacks), 1);
    assert_eq!(MockStats::get(&stats.connection_closes), 1);
}

#[test]
fn test_failed_commit_rolls_back_once() {
    let driver = MockDriver::new(0).fail_commit();
    let stats = Arc::clone(&driver.stats);
    let engine = Engine::new(driver);

    let outcome = engine.with_transaction(
        |s| {
            s.execute("update t set a = 1", ())?;
            Ok(())
        },
        (),
    );

    assert!(!outcome.success);
    let message = format!("{:#}", outcome.error.as_ref().unwrap());
    assert!(message.contains("commit failed"), "{}", message);
    assert!(message.contains("mock commit failure"), "{}", message);
    assert_eq!(MockStats::get(&stats.commits), 1);
    assert_eq!(MockStats::get(&stats.rollbacks), 1);
    assert_eq!(MockStats::get(&stats.connection_closes), 1);
}

#[test]
fn test_result_survives_panic() {
    let engine = Engine::new(MockDriver::new(0));

    let outcome = engine.with_transaction(
        |s| {
            s.set_result(5);
            panic!("after result");
        },
        (),
    );

    assert_eq!(outcome.panic.as_deref(), Some("after result"));
    assert_eq!(outcome.result, Some(Value::Int(5)));
}

#[test]
fn test_table_exists_and_scalar_queries() {
    let engine = Engine::new(MockDriver::new(3));

    engine
        .transaction(|s| {
            assert!(s.table_exists("t")?);
            assert!(!s.table_exists("x")?);
            assert_eq!(s.query_scalar::<i64, _>("select id from t", ())?, Some(1));
            assert_eq!(s.query_scalar::<String, _>("select id from t", ())?, Some("1".to_string()));
            assert_eq!(s.open_streams(), 0);
            Ok(())
        })
        .unwrap();

    let empty = Engine::new(MockDriver::new(0));
    let none = empty
        .transaction(|s| s.query_scalar::<i64, _>("select id from t", ()))
        .unwrap();
    assert_eq!(none, None);
}

#[cfg(feature = "sqlite")]
mod sqlite {
    use eyre::{bail, eyre};
    use tempfile::TempDir;
    use txsession::driver::sqlite::{SqliteConnection, SqliteDriver};
    use txsession::engine::{generated_ids, StatementFailed};
    use txsession::{params, record, Engine, Session, Value};

    const SCHEMA: &str =
        "create table t_user (id integer primary key autoincrement, name text not null, age integer)";

    fn engine_in(dir: &TempDir) -> Engine<SqliteDriver> {
        let engine = Engine::new(SqliteDriver::open(dir.path().join("test.db")));
        engine.update(SCHEMA, ()).unwrap();
        engine
    }

    #[test]
    fn test_rollback_discards_inserted_row() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(&dir);

        let outcome = engine.with_transaction(
            |s| {
                s.execute("insert into t_user (name) values (?)", params!["Alice"])?;
                assert_eq!(s.query_all("select * from t_user", ())?.len(), 1);
                bail!("abort after insert");
            },
            (),
        );

        assert!(!outcome.success);
        assert!(engine.query_all("select * from t_user", ()).unwrap().is_empty());
    }

    #[test]
    fn test_commit_keeps_row_and_reports_generated_key() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(&dir);

        let outcome = engine.with_transaction(
            |s| {
                let keys = s.update("insert into t_user (name, age) values (?, ?)", params!["Alice", 30])?;
                let ids = generated_ids(&keys);
                assert_eq!(ids.len(), 1);
                s.set_result(ids[0]);
                Ok(())
            },
            (),
        );

        assert!(outcome.success, "{:?}", outcome);
        assert_eq!(outcome.result, Some(Value::Int(1)));

        let rows = engine
            .query_all("select name, age from t_user where id = ?", params![1])
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_text("name").unwrap(), "Alice");
        assert_eq!(rows[0].get_int("age").unwrap(), 30);
    }

    #[test]
    fn test_failed_statement_reports_its_sql() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(&dir);
        let sql = "select * from no_such_table";

        let outcome = engine.with_transaction(
            |s| {
                let err = s.query_all(sql, ()).unwrap_err();
                assert_eq!(s.error_sql().as_deref(), Some(sql));
                Err(err)
            },
            (),
        );

        let error = outcome.error.unwrap();
        let failed = error.downcast_ref::<StatementFailed>().unwrap();
        assert_eq!(failed.sql, sql);
    }

    #[test]
    fn test_named_sql_templates() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::builder(SqliteDriver::open(dir.path().join("test.db")))
            .named_sql_script(
                "-- # by_name\n\
                 select id, name from t_user where name = #name\n\
                 -- # set_age\n\
                 update t_user set age = ##age where name = #name\n",
            )
            .build();
        engine.update(SCHEMA, ()).unwrap();

        let age = engine
            .transaction(|s| {
                s.execute_script(
                    "insert into t_user (name) values ('Alice');\n\
                     insert into t_user (name) values ('Bob');\n",
                )?;
                let rows = s
                    .query_template("#by_name", &record! { "name" => "Bob" })?
                    .collect::<eyre::Result<Vec<_>>>()?;
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0].get_text("name")?, "Bob");

                let changed = s.execute_template("#set_age", &record! { "age" => 41, "name" => "Bob" })?;
                assert_eq!(changed, 1);

                s.query_first("select age from t_user where name = ?", params!["Bob"])?
                    .ok_or_else(|| eyre!("Bob is missing"))?
                    .get_int("age")
            })
            .unwrap();

        assert_eq!(age, 41);
    }

    #[test]
    fn test_script_skips_comments_and_counts_rows() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(&dir);

        let counts = engine
            .transaction(|s| {
                s.execute_script(
                    "insert into t_user (name) values ('a');\n\
                     insert into t_user (name) values ('b');\n\n\
                     update t_user set age = 1;\n\
                     -- trailing comment\n",
                )
            })
            .unwrap();

        assert_eq!(counts, vec![1, 1, 2]);
    }

    #[test]
    fn test_pages_counts_and_first_row() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(&dir);

        engine
            .transaction(|s| {
                for i in 0..7i64 {
                    s.execute(
                        "insert into t_user (name, age) values (?, ?)",
                        params![format!("u{}", i), i],
                    )?;
                }

                let mut sizes = Vec::new();
                let pages = s.query_pages("select * from t_user order by id", (), 3, |page| {
                    sizes.push(page.len());
                    Ok(())
                })?;
                assert_eq!(pages, 3);
                assert_eq!(sizes, vec![3, 3, 1]);

                assert_eq!(s.row_count("select * from t_user", ())?, 7);
                assert_eq!(s.row_count("select * from t_user where age > ?", params![4])?, 2);

                let first = s.query_first("select name from t_user where age = ?", params![4])?;
                assert_eq!(first.unwrap().get_text("name")?, "u4");
                assert!(s
                    .query_first("select name from t_user where age = ?", params![99])?
                    .is_none());
                assert_eq!(s.open_streams(), 0);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_memory_database_is_shared_across_units() {
        let engine = Engine::new(SqliteDriver::memory().unwrap());
        engine.update(SCHEMA, ()).unwrap();

        engine
            .transaction(|s| s.execute("insert into t_user (name) values (?)", params!["Carol"]))
            .unwrap();

        let rows = engine.query_all("select name from t_user", ()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_text("name").unwrap(), "Carol");
    }

    fn insert_users(s: &Session<SqliteConnection>, n: i64) -> eyre::Result<()> {
        for i in 1..=n {
            s.execute("insert into t_user (name, age) values (?, ?)", params![format!("u{}", i), i])?;
        }
        Ok(())
    }

    #[test]
    fn test_partial_read_never_reaches_failing_row() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(&dir);

        engine
            .transaction(|s| {
                insert_users(s, 10)?;
                let mut stream = s.query(
                    "select case when id > 4 then abs(-9223372036854775808) else id end as v \
                     from t_user order by id",
                    (),
                )?;
                let mut seen = Vec::new();
                for row in stream.by_ref().take(3) {
                    seen.push(row?.get_int("v")?);
                }
                assert_eq!(seen, vec![1, 2, 3]);
                stream.close()?;
                assert_eq!(s.open_streams(), 0);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_rows_before_a_failing_row_are_delivered() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(&dir);

        let (seen, failed) = engine
            .transaction(|s| {
                insert_users(s, 5)?;
                let stream = s.query(
                    "select case when id = 3 then abs(-9223372036854775808) else id end as v \
                     from t_user order by id",
                    (),
                )?;
                let mut seen = Vec::new();
                let mut failed = false;
                for row in stream {
                    match row {
                        Ok(row) => seen.push(row.get_int("v")?),
                        Err(_) => {
                            failed = true;
                            break;
                        }
                    }
                }
                Ok((seen, failed))
            })
            .unwrap();

        assert_eq!(seen, vec![1, 2]);
        assert!(failed);
    }

    #[test]
    fn test_script_select_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(&dir);

        let counts = engine
            .transaction(|s| {
                s.execute_script(
                    "insert into t_user (name) values ('a'), ('b'), ('c');\n\
                     select id from t_user;\n",
                )
            })
            .unwrap();

        assert_eq!(counts, vec![3, 0]);
    }

    #[test]
    fn test_table_exists_and_scalar_queries() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(&dir);

        engine
            .transaction(|s| {
                assert!(s.table_exists("t_user")?);
                assert!(s.table_exists_in("t_user", "main")?);
                assert!(!s.table_exists("t_missing")?);

                assert_eq!(s.query_scalar::<i64, _>("select count(*) from t_user", ())?, Some(0));
                insert_users(s, 2)?;
                assert_eq!(s.query_scalar::<i64, _>("select count(*) from t_user", ())?, Some(2));
                assert_eq!(
                    s.query_scalar::<String, _>("select name from t_user where id = ?", params![2])?,
                    Some("u2".to_string())
                );
                assert_eq!(s.query_scalar::<i64, _>("select age from t_user where id = ?", params![99])?, None);
                assert_eq!(s.query_scalar::<f64, _>("select null", ())?, None);
                Ok(())
            })
            .unwrap();
    }
}
