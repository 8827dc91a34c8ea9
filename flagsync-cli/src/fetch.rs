use std::process;

use flagsync::{Config, DataKind, HttpRequestor, Requestor, VersionedItem};
use serde_json::{Map, Value};

pub async fn run_fetch(config: Config, flag: Option<String>, segment: Option<String>) {
    let requestor = HttpRequestor::new(&config);

    let result = match (flag, segment) {
        (Some(key), _) => requestor.fetch_flag(&key).await.map(|item| item.payload),
        (None, Some(key)) => requestor.fetch_segment(&key).await.map(|item| item.payload),
        (None, None) => requestor.fetch_all().await.map(|snapshot| {
            let mut out = Map::new();
            for kind in DataKind::ALL {
                let items = snapshot
                    .get(&kind)
                    .map(|items| payloads(items.values()))
                    .unwrap_or_default();
                out.insert(kind.to_string(), Value::Object(items));
            }
            Value::Object(out)
        }),
    };

    let value = match result {
        Ok(value) => value,
        Err(e) => {
            eprintln!("Failed to fetch: {}", e);
            process::exit(1);
        }
    };

    match serde_json::to_string_pretty(&value) {
        Ok(text) => println!("{}", text),
        Err(e) => {
            eprintln!("Failed to render response: {}", e);
            process::exit(1);
        }
    }
}

fn payloads<'a>(items: impl Iterator<Item = &'a VersionedItem>) -> Map<String, Value> {
    items
        .filter(|item| !item.deleted)
        .map(|item| (item.key.clone(), item.payload.clone()))
        .collect()
}
