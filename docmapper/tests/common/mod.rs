#![allow(dead_code)]

use docmapper::{memory::InMemoryStore, prelude::*};
use std::sync::Arc;

pub fn context(schemas: impl IntoIterator<Item = Arc<Schema>>) -> Context {
    let registry = schemas
        .into_iter()
        .fold(SchemaRegistry::new(), |registry, schema| registry.with(schema));
    Context::new(InMemoryStore::new(), registry)
}

pub fn text(document: &Document, key: &str) -> String {
    document
        .read(key)
        .as_str()
        .unwrap_or_default()
        .to_string()
}

pub fn texts(documents: &[Document], key: &str) -> Vec<String> {
    documents
        .iter()
        .map(|document| text(document, key))
        .collect()
}
