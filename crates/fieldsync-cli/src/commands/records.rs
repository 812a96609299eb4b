use std::path::Path;

use fieldsync_core::Mutation;

use crate::commands::common::{
    format_record_lines, open_store, parse_key, record_to_list_item, resolve_payload,
    RecordListItem,
};
use crate::error::CliError;

pub async fn run_put(target: &str, payload: Option<&str>, db_path: &Path) -> Result<(), CliError> {
    let payload = resolve_payload(payload)?;
    let mutation = match target.trim().split_once('/') {
        Some(_) => {
            let key = parse_key(target)?;
            Mutation::upsert(key.collection, key.id, payload)
        }
        None => Mutation::create(target.trim(), payload),
    };

    let store = open_store(db_path).await?;
    let record = store.apply(mutation).await?;
    println!("{}", record.key());
    Ok(())
}

pub async fn run_get(key: &str, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let key = parse_key(key)?;
    let store = open_store(db_path).await?;
    let record = store
        .get(&key)
        .await?
        .filter(|record| !record.deleted)
        .ok_or_else(|| CliError::RecordNotFound(key.to_string()))?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        println!("{}", serde_json::to_string_pretty(&record.payload)?);
        if record.has_pending_changes() {
            println!("(not yet synced)");
        }
        if let Some(origin) = record.duplicate_of.as_ref() {
            println!("(copy of {}/{origin})", record.collection);
        }
    }
    Ok(())
}

pub async fn run_list(
    collection: &str,
    limit: usize,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let mut records = store.list(collection).await?;
    records.truncate(limit);

    if as_json {
        let items = records
            .iter()
            .map(record_to_list_item)
            .collect::<Vec<RecordListItem>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else {
        for line in format_record_lines(&records) {
            println!("{line}");
        }
    }
    Ok(())
}

pub async fn run_delete(key: &str, db_path: &Path) -> Result<(), CliError> {
    let key = parse_key(key)?;
    let store = open_store(db_path).await?;
    match store
        .apply(Mutation::delete(key.collection.clone(), key.id.clone()))
        .await
    {
        Ok(_) => {
            println!("Deleted {key}");
            Ok(())
        }
        Err(fieldsync_core::Error::NotFound(_)) => Err(CliError::RecordNotFound(key.to_string())),
        Err(error) => Err(error.into()),
    }
}
