use std::collections::HashSet;
use std::net::{IpAddr, Ipv6Addr};
use std::sync::Arc;
use std::time::Instant;

use num_bigint::BigInt;
use serde::Serialize;
use tokio::task::JoinSet;
use uuid::Uuid;

use tessera_api::{ConsistencyLevel, Decimal, Value};
use tessera_engine::{Session, SessionStats};

use crate::error::BenchError;

const SCHEMA: &[&str] = &[
    "CREATE KEYSPACE tester WITH replication = {'class': 'SimpleStrategy', 'replication_factor': 1}",
    "CREATE TABLE tester.alltypes (
        id int PRIMARY KEY,
        b boolean, i int, bi bigint, f float, d double, dec decimal, vi varint,
        t text, bl blob, ts timestamp, u uuid, ip inet,
        l list<int>, s set<text>, m map<text, bigint>
    )",
    "CREATE TABLE tester.massive (id uuid PRIMARY KEY, slot int, d double, i int)",
];

const COLUMNS: &[&str] = &[
    "b", "i", "bi", "f", "d", "dec", "vi", "t", "bl", "ts", "u", "ip", "l", "s", "m",
];

#[derive(Debug, Serialize)]
pub struct Summary {
    pub nodes: usize,
    pub typed_columns: usize,
    pub massive_prepares: usize,
    pub distinct_ids: usize,
    pub elapsed_ms: u128,
    pub stats: SessionStats,
}

/// One value per column of `tester.alltypes`, in `COLUMNS` order.
fn sample_values() -> Vec<Value> {
    vec![
        Value::Boolean(true),
        Value::Int(-42),
        Value::BigInt(i64::MAX),
        Value::Float(1.5),
        Value::Double(-8.25e10),
        Value::Decimal(Decimal::new(BigInt::from(-810_101), 5)),
        Value::VarInt(BigInt::from(i64::MIN) * 1_000_003),
        Value::Text("żółw 🐢".to_string()),
        Value::Blob(vec![0xDE, 0xAD, 0xBE, 0xEF].into()),
        Value::Timestamp(1_700_000_000_123),
        Value::Uuid(Uuid::new_v4()),
        Value::Inet(IpAddr::V6(Ipv6Addr::LOCALHOST)),
        Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
        Value::Set(vec![Value::Text("a".into()), Value::Text("b".into())]),
        Value::Map(vec![(Value::Text("k".into()), Value::BigInt(7))]),
    ]
}

pub async fn run(session: Arc<Session>, nodes: usize, prepares: usize) -> Result<Summary, BenchError> {
    let started = Instant::now();

    // --- Schema ---
    for statement in SCHEMA {
        ddl(&session, statement).await?;
    }

    // --- All types in one row, then a row of nulls ---
    let values = sample_values();
    let insert_all = format!(
        "INSERT INTO tester.alltypes (id, {}) VALUES (?{})",
        COLUMNS.join(", "),
        ", ?".repeat(COLUMNS.len())
    );
    let mut row = vec![Value::Int(1)];
    row.extend(values.iter().cloned());
    session.execute_prepared(&insert_all, &row).await?;
    verify_row(&session, 1, &values).await?;

    let mut nulls = vec![Value::Int(2)];
    nulls.extend(std::iter::repeat_n(Value::Null, COLUMNS.len()));
    session.execute_prepared(&insert_all, &nulls).await?;
    verify_row(&session, 2, &vec![Value::Null; COLUMNS.len()]).await?;
    tracing::info!(columns = COLUMNS.len(), "all-types rows verified");

    // --- One statement per column ---
    for (i, (column, value)) in COLUMNS.iter().zip(&values).enumerate() {
        let id = 100 + i as i32;
        let insert = format!("INSERT INTO tester.alltypes (id, {column}) VALUES (?, ?)");
        session.execute_prepared(&insert, &[Value::Int(id), value.clone()]).await?;

        let select = format!("SELECT {column} FROM tester.alltypes WHERE id = ?");
        let read = session
            .execute_prepared(&select, &[Value::Int(id)])
            .await?
            .first_row()?;
        let read = match &read {
            Some(row) => row.get(0)?.clone(),
            None => Value::Null,
        };
        check(column, value, &read)?;
    }

    // --- Many distinct statements at once ---
    let distinct_ids = massive(&session, prepares).await?;
    tracing::info!(prepares, distinct_ids, "massive phase done");

    Ok(Summary {
        nodes,
        typed_columns: COLUMNS.len(),
        massive_prepares: prepares,
        distinct_ids,
        elapsed_ms: started.elapsed().as_millis(),
        stats: session.stats(),
    })
}

/// Run DDL, treating an already existing object as success.
async fn ddl(session: &Session, statement: &str) -> Result<(), BenchError> {
    match session.execute_direct(statement, ConsistencyLevel::All).await {
        Ok(result) => {
            if result.schema_agreement().is_some_and(|a| !a.is_converged()) {
                return Err(BenchError::Agreement(statement.to_string()));
            }
            Ok(())
        }
        Err(e) if e.is_already_exists() => {
            tracing::info!(statement, "schema object already exists");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn verify_row(session: &Session, id: i32, expected: &[Value]) -> Result<(), BenchError> {
    let select = format!("SELECT {} FROM tester.alltypes WHERE id = ?", COLUMNS.join(", "));
    let row = session
        .execute_prepared(&select, &[Value::Int(id)])
        .await?
        .first_row()?;
    let read = match row {
        Some(row) => row.values()?,
        None => Vec::new(),
    };
    if read.len() != expected.len() {
        return Err(BenchError::Mismatch {
            what: format!("row {id}"),
            wrote: format!("{} columns", expected.len()),
            read: format!("{} columns", read.len()),
        });
    }
    for ((column, wrote), read) in COLUMNS.iter().zip(expected).zip(&read) {
        check(column, wrote, read)?;
    }
    Ok(())
}

fn check(column: &str, wrote: &Value, read: &Value) -> Result<(), BenchError> {
    if wrote == read {
        return Ok(());
    }
    Err(BenchError::Mismatch {
        what: format!("column {column}"),
        wrote: format!("{wrote:?}"),
        read: format!("{read:?}"),
    })
}

/// Prepare `count` distinct inserts concurrently, then execute them all at
/// once and read every row back. Returns how many distinct statement ids
/// came back.
async fn massive(session: &Arc<Session>, count: usize) -> Result<usize, BenchError> {
    let mut prepares = JoinSet::new();
    for slot in 0..count as i32 {
        let session = session.clone();
        prepares.spawn(async move {
            let query = format!("INSERT INTO tester.massive (id, slot, d, i) VALUES (?, {slot}, ?, ?)");
            Ok::<_, BenchError>((slot, session.prepare(&query).await?))
        });
    }
    let mut statements = Vec::with_capacity(count);
    while let Some(joined) = prepares.join_next().await {
        statements.push(joined??);
    }
    let ids: HashSet<_> = statements.iter().map(|(_, s)| s.id().clone()).collect();
    if ids.len() != count {
        return Err(BenchError::DistinctIds {
            expected: count,
            actual: ids.len(),
        });
    }

    let mut executes = JoinSet::new();
    for (slot, statement) in statements {
        let session = session.clone();
        executes.spawn(async move {
            let bound = session.bind(
                &statement,
                &[Value::Uuid(Uuid::new_v4()), massive_double(slot), Value::Int(slot)],
            )?;
            session.execute(&bound).await?;
            Ok::<_, BenchError>(())
        });
    }
    while let Some(joined) = executes.join_next().await {
        joined??;
    }

    let rows = session
        .execute_direct("SELECT slot, d, i FROM tester.massive", ConsistencyLevel::One)
        .await?;
    let mut slots = HashSet::new();
    for row in rows {
        let row = row?;
        let slot = row.get_as::<i32>("slot")?;
        check(&format!("massive d of slot {slot}"), &massive_double(slot), row.get("d")?)?;
        check(&format!("massive i of slot {slot}"), &Value::Int(slot), row.get("i")?)?;
        slots.insert(slot);
    }
    if slots.len() != count {
        return Err(BenchError::Mismatch {
            what: "massive rows".to_string(),
            wrote: count.to_string(),
            read: slots.len().to_string(),
        });
    }
    tracing::info!(rows = slots.len(), "massive table verified");
    Ok(ids.len())
}

fn massive_double(slot: i32) -> Value {
    Value::Double(f64::from(slot) / 3.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_cover_every_column() {
        assert_eq!(sample_values().len(), COLUMNS.len());
        assert!(sample_values().iter().all(|v| !v.is_null()));
    }

    #[test]
    fn samples_match_their_declared_columns() {
        let declared = [
            "boolean", "int", "bigint", "float", "double", "decimal", "varint", "text", "blob",
            "timestamp", "uuid", "inet", "list<int>", "set<text>", "map<text, bigint>",
        ];
        let types: Vec<tessera_api::LogicalType> =
            declared.iter().map(|t| t.parse().unwrap()).collect();
        assert_eq!(types.len(), COLUMNS.len());
        for (value, ty) in sample_values().iter().zip(&types) {
            assert!(value.conforms_to(ty), "{value:?} vs {ty}");
        }
    }
}
