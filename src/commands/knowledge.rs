//! Implementation of the `prpflow knowledge` subcommands.
//!
//! All of them open the journaled store at `.prpflow/knowledge.ndjson` and
//! embed text with the built-in hashing embedder at the configured width.

use crate::cli::{
    KnowledgeAction, KnowledgeAddArgs, KnowledgeCommand, KnowledgeIdArgs, KnowledgeQueryArgs,
};
use crate::context::require_initialized;
use crate::error::{FlowError, Result};
use crate::knowledge::{HashingEmbedder, KnowledgeEntry, KnowledgeFilter, KnowledgeStore, SourceType};
use serde_json::Value;

pub fn dispatch(command: KnowledgeCommand) -> Result<()> {
    let ctx = require_initialized()?;
    let config = ctx.load_config()?;
    let dimension = config.knowledge.embedding_dimension;
    let store = KnowledgeStore::open(ctx.knowledge_path(), dimension)?;
    let embedder = HashingEmbedder::new(dimension);

    match command.action {
        KnowledgeAction::Add(args) => cmd_add(&store, &embedder, args),
        KnowledgeAction::Query(args) => cmd_query(&store, &embedder, args),
        KnowledgeAction::Get(args) => cmd_get(&store, args),
        KnowledgeAction::Delete(args) => cmd_delete(&store, args),
        KnowledgeAction::Stats => cmd_stats(&store),
    }
}

fn parse_source_type(s: &str) -> Result<SourceType> {
    SourceType::from_str(s).ok_or_else(|| {
        FlowError::UserError(format!(
            "unknown source type '{}'.\n\nFix: use one of document, code, success-pattern, failure-pattern.",
            s
        ))
    })
}

/// `key=value`; the value is JSON when it parses as JSON, a string otherwise.
fn parse_metadata(pair: &str) -> Result<(String, Value)> {
    let Some((key, raw)) = pair.split_once('=') else {
        return Err(FlowError::UserError(format!(
            "invalid metadata '{}': expected KEY=VALUE",
            pair
        )));
    };
    let key = key.trim();
    if key.is_empty() {
        return Err(FlowError::UserError(format!(
            "invalid metadata '{}': key is empty",
            pair
        )));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

fn cmd_add(store: &KnowledgeStore, embedder: &HashingEmbedder, args: KnowledgeAddArgs) -> Result<()> {
    let source_type = parse_source_type(&args.source_type)?;
    let mut entry = KnowledgeEntry::new(&args.content, embedder.embed_sync(&args.content), source_type);
    for tag in args.tags.iter().filter(|t| !t.trim().is_empty()) {
        entry = entry.with_tag(tag.trim());
    }
    for pair in &args.metadata {
        let (key, value) = parse_metadata(pair)?;
        entry = entry.with_metadata(key, value);
    }

    let id = store.store(entry)?;
    println!("{}", id);
    Ok(())
}

fn cmd_query(store: &KnowledgeStore, embedder: &HashingEmbedder, args: KnowledgeQueryArgs) -> Result<()> {
    let mut filter = KnowledgeFilter::default();
    if let Some(source_type) = &args.source_type {
        filter = filter.with_source(parse_source_type(source_type)?);
    }
    for tag in &args.tags {
        filter = filter.with_tag(tag.trim());
    }

    let hits = store.query(&embedder.embed_sync(&args.text), args.k, Some(&filter))?;
    if hits.is_empty() {
        println!("No matching entries.");
        return Ok(());
    }
    for hit in hits {
        let first = hit.entry.content.lines().next().unwrap_or("");
        println!(
            "{:.3}  {}  [{}]  {}",
            hit.score, hit.entry.id, hit.entry.source_type, first
        );
    }
    Ok(())
}

fn cmd_get(store: &KnowledgeStore, args: KnowledgeIdArgs) -> Result<()> {
    let entry = store.get(&args.id)?;
    let json = serde_json::json!({
        "id": entry.id,
        "source_type": entry.source_type,
        "created_at": entry.created_at,
        "tags": entry.tags,
        "metadata": entry.metadata,
        "content": entry.content,
    });
    let rendered = serde_json::to_string_pretty(&json)
        .map_err(|e| FlowError::UserError(format!("failed to render entry: {}", e)))?;
    println!("{}", rendered);
    Ok(())
}

fn cmd_delete(store: &KnowledgeStore, args: KnowledgeIdArgs) -> Result<()> {
    store.delete(&args.id)?;
    println!("Deleted {}", args.id);
    Ok(())
}

fn cmd_stats(store: &KnowledgeStore) -> Result<()> {
    let stats = store.stats();
    println!("Entries:    {}", stats.total);
    println!("Dimension:  {}", stats.dimension);
    println!("Superseded: {}", stats.superseded);
    for (source_type, count) in &stats.by_source_type {
        println!("  {:<16} {}", source_type, count);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::STATE_DIR;
    use crate::test_support::{DirGuard, create_flow_dir};
    use serial_test::serial;

    #[test]
    fn test_parse_metadata_values() {
        assert_eq!(
            parse_metadata("attempt=3").unwrap(),
            ("attempt".to_string(), serde_json::json!(3))
        );
        assert_eq!(
            parse_metadata("file=src/auth.rs").unwrap(),
            ("file".to_string(), Value::String("src/auth.rs".into()))
        );
        assert!(parse_metadata("no-equals").is_err());
        assert!(parse_metadata("=x").is_err());
    }

    #[test]
    fn test_unknown_source_type() {
        let err = parse_source_type("blog").unwrap_err();
        assert!(err.to_string().contains("failure-pattern"));
    }

    #[test]
    #[serial]
    fn test_add_persists_to_journal() {
        let temp = create_flow_dir();
        let _guard = DirGuard::new(temp.path());

        let add = |content: &str| {
            dispatch(KnowledgeCommand {
                action: KnowledgeAction::Add(KnowledgeAddArgs {
                    content: content.to_string(),
                    source_type: "code".into(),
                    tags: vec!["auth".into()],
                    metadata: vec!["file=src/auth.rs".into()],
                }),
            })
        };
        add("Compare password hashes in constant time").unwrap();
        add("Sessions expire after thirty minutes").unwrap();

        let store = KnowledgeStore::open(
            temp.path().join(STATE_DIR).join("knowledge.ndjson"),
            crate::config::Config::default().knowledge.embedding_dimension,
        )
        .unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.stats().by_source_type.get("code"), Some(&2));

        dispatch(KnowledgeCommand {
            action: KnowledgeAction::Query(KnowledgeQueryArgs {
                text: "password hash".into(),
                k: 1,
                source_type: Some("code".into()),
                tags: vec!["auth".into()],
            }),
        })
        .unwrap();
        dispatch(KnowledgeCommand {
            action: KnowledgeAction::Stats,
        })
        .unwrap();
    }

    #[test]
    #[serial]
    fn test_get_and_delete_unknown_id() {
        let temp = create_flow_dir();
        let _guard = DirGuard::new(temp.path());

        for action in [
            KnowledgeAction::Get(KnowledgeIdArgs { id: "missing".into() }),
            KnowledgeAction::Delete(KnowledgeIdArgs { id: "missing".into() }),
        ] {
            let err = dispatch(KnowledgeCommand { action }).unwrap_err();
            assert!(matches!(err, FlowError::NotFound(_)));
        }
    }
}
