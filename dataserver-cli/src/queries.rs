//! Queries available to every content tree served by the CLI.

use anyhow::{bail, Context};
use dataserver_core::{ContentRecord, QueryContext, QueryOutput, QueryRegistry, SubsetFilter};
use dataserver_incremental::WILDCARD;
use serde_json::{json, Value};

pub fn builtin() -> QueryRegistry {
    QueryRegistry::new()
        .register_fn("list", list)
        .register_fn("url", by_url)
        .register_fn("uuid", by_uuid)
}

/// `list?dir=en/entity/node[&variant=..][&extension=..][&recursive=true]`
fn list(ctx: &QueryContext<'_>) -> anyhow::Result<QueryOutput> {
    let dir = ctx.arg("dir").context("missing argument 'dir'")?;

    let mut filter = SubsetFilter::new(dir).recursive(ctx.arg("recursive") == Some("true"));
    if let Some(variant) = ctx.arg("variant") {
        filter = filter.variant(variant);
    }
    if let Some(extension) = ctx.arg("extension") {
        filter = filter.extension(extension);
    }

    let paths = ctx.store.subset(&filter);
    let items: Vec<Value> = paths
        .iter()
        .filter_map(|path| ctx.store.get(path))
        .map(summary)
        .collect();

    // Any added or removed file can change a listing
    Ok(QueryOutput::new(Value::Array(items)).with_tags([WILDCARD]))
}

/// `url?path=/en/some/page`
fn by_url(ctx: &QueryContext<'_>) -> anyhow::Result<QueryOutput> {
    let url = ctx.arg("path").context("missing argument 'path'")?;
    let Some(record) = ctx.store.by_url(url) else {
        bail!("no record with public URL {url:?}");
    };
    Ok(QueryOutput::new(summary(record)).with_tags([record.path()]))
}

/// `uuid?locale=en&uuid=...`
fn by_uuid(ctx: &QueryContext<'_>) -> anyhow::Result<QueryOutput> {
    let locale = ctx.arg("locale").context("missing argument 'locale'")?;
    let uuid = ctx.arg("uuid").context("missing argument 'uuid'")?;
    let Some(record) = ctx.store.by_uuid(locale, uuid) else {
        bail!("no {locale} record with uuid {uuid}");
    };
    Ok(QueryOutput::new(summary(record)).with_tags([record.path()]))
}

fn summary(record: &ContentRecord) -> Value {
    json!({
        "path": record.path(),
        "url": record.public_url(),
        "uuid": record.uuid(),
        "locale": record.locale(),
    })
}
