mod common;

use docmapper::prelude::*;
use std::sync::Arc;

fn page_schema() -> Arc<Schema> {
    Schema::builder("Page")
        .key("title", KeyType::String)
        .key_with("day_count", KeyType::Integer, KeyOptions::new().default_value(0))
        .key_with("week_count", KeyType::Integer, KeyOptions::new().default_value(0))
        .key_with("tags", KeyType::Array, KeyOptions::new().default_value(Bson::Array(vec![])))
        .build()
}

fn strings(value: Bson) -> Vec<String> {
    match value {
        Bson::Array(items) => items
            .into_iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

#[tokio::test]
async fn instance_modifiers_update_storage_and_memory() -> MapperResult<()> {
    let ctx = common::context([page_schema()]);
    let pages = ctx.query("Page")?;
    let mut home = pages.create(doc! { "title": "Home" }).await?;

    home.increment(&ctx, "day_count", 2).await?;
    home.decrement(&ctx, "week_count", 1).await?;
    home.push(&ctx, "tags", "news").await?;
    home.add_to_set(&ctx, "tags", "news").await?;
    home.add_to_set(&ctx, "tags", "sports").await?;
    home.pull(&ctx, "tags", "news").await?;

    assert!(!home.is_changed());
    assert_eq!(home.read("day_count").as_i64(), Some(2));
    assert_eq!(home.read("week_count").as_i64(), Some(-1));
    assert_eq!(strings(home.read("tags")), ["sports"]);

    let stored = pages.find_strict(home.id()).await?;
    assert_eq!(stored.read("day_count").as_i64(), Some(2));
    assert_eq!(stored.read("week_count").as_i64(), Some(-1));
    assert_eq!(strings(stored.read("tags")), ["sports"]);
    Ok(())
}

#[tokio::test]
async fn modifiers_leave_pending_changes_alone() -> MapperResult<()> {
    let ctx = common::context([page_schema()]);
    let mut home = ctx.query("Page")?.create(doc! { "title": "Home" }).await?;

    home.write("title", "Landing");
    home.push_all(&ctx, "tags", vec![Bson::from("a"), Bson::from("b"), Bson::from("c")])
        .await?;
    home.pop(&ctx, "tags", 1).await?;
    home.pull_all(&ctx, "tags", vec![Bson::from("a")]).await?;

    assert_eq!(home.changed(), vec!["title".to_string()]);
    assert_eq!(strings(home.read("tags")), ["b"]);
    Ok(())
}

#[tokio::test]
async fn set_and_unset_on_an_instance() -> MapperResult<()> {
    let ctx = common::context([page_schema()]);
    let pages = ctx.query("Page")?;
    let mut home = pages.create(doc! { "title": "Home", "theme": "dark" }).await?;

    home.set(&ctx, doc! { "title": "Start", "day_count": "9" }).await?;
    home.unset(&ctx, &["theme"]).await?;

    assert_eq!(common::text(&home, "title"), "Start");
    assert_eq!(home.read("day_count").as_i64(), Some(9));
    assert_eq!(home.read("theme"), Bson::Null);

    let stored = pages.find_strict(home.id()).await?;
    assert_eq!(common::text(&stored, "title"), "Start");
    assert!(stored.dynamic_keys().is_empty());
    Ok(())
}

#[tokio::test]
async fn class_level_modifiers_touch_every_match() -> MapperResult<()> {
    let ctx = common::context([page_schema()]);
    let pages = ctx.query("Page")?;
    pages
        .create_many(vec![
            doc! { "title": "One" },
            doc! { "title": "Two" },
            doc! { "title": "Three" },
        ])
        .await?;

    assert_eq!(pages.increment("day_count", 5).await?, 3);
    assert_eq!(pages.filter(doc! { "title": "One" }).decrement("day_count", 2).await?, 1);
    assert_eq!(pages.filter(doc! { "title.ne": "One" }).set(doc! { "title": "Other" }).await?, 2);
    assert_eq!(pages.add_to_set("tags", vec![Bson::from("x"), Bson::from("y")]).await?, 3);
    assert_eq!(pages.unset(&["week_count"]).await?, 3);

    let one = pages.find_by("title", "One").await?;
    assert_eq!(one.and_then(|page| page.read("day_count").as_i64()), Some(3));
    assert_eq!(pages.filter(doc! { "title": "Other", "day_count": 5 }).count().await?, 2);
    assert_eq!(pages.filter(doc! { "tags": "y" }).count().await?, 3);
    Ok(())
}

#[tokio::test]
async fn find_and_modify_returns_the_original_by_default() -> MapperResult<()> {
    let ctx = common::context([page_schema()]);
    let pages = ctx.query("Page")?;
    pages.create(doc! { "title": "Counter", "day_count": 1 }).await?;

    let before = pages
        .filter(doc! { "title": "Counter" })
        .find_and_modify(Update::new().inc("day_count", 1), ModifyOptions::new())
        .await?;
    assert_eq!(before.and_then(|page| page.read("day_count").as_i64()), Some(1));

    let after = pages
        .filter(doc! { "title": "Counter" })
        .find_and_modify(Update::new().inc("day_count", 1), ModifyOptions::new().return_new())
        .await?;
    assert_eq!(after.and_then(|page| page.read("day_count").as_i64()), Some(3));

    let nothing = pages
        .filter(doc! { "title": "Missing" })
        .find_and_modify(Update::new().inc("day_count", 1), ModifyOptions::new())
        .await?;
    assert!(nothing.is_none());
    assert_eq!(pages.count().await?, 1);
    Ok(())
}

#[tokio::test]
async fn find_and_modify_can_upsert() -> MapperResult<()> {
    let ctx = common::context([page_schema()]);
    let pages = ctx.query("Page")?;

    let created = pages
        .filter(doc! { "title": "Fresh" })
        .find_and_modify(
            Update::new().inc("day_count", 1),
            ModifyOptions::new().upsert().return_new(),
        )
        .await?;

    let Some(created) = created else {
        panic!("upsert returned nothing");
    };
    assert!(created.is_persisted());
    assert_eq!(common::text(&created, "title"), "Fresh");
    assert_eq!(created.read("day_count").as_i64(), Some(1));
    assert!(pages.find(created.id()).await?.is_some());
    Ok(())
}

#[tokio::test]
async fn inverse_modifiers_restore_the_stored_value() -> MapperResult<()> {
    let ctx = common::context([page_schema()]);
    let pages = ctx.query("Page")?;
    let mut home = pages.create(doc! { "title": "Home", "day_count": 7, "tags": ["a"] }).await?;

    home.increment(&ctx, "day_count", 13).await?;
    home.decrement(&ctx, "day_count", 13).await?;
    home.push(&ctx, "tags", "b").await?;
    home.pull(&ctx, "tags", "b").await?;

    let stored = pages.find_strict(home.id()).await?;
    assert_eq!(stored.read("day_count").as_i64(), Some(7));
    assert_eq!(strings(stored.read("tags")), ["a"]);
    Ok(())
}

#[tokio::test]
async fn integer_keys_truncate_fractional_deltas() -> MapperResult<()> {
    let ctx = common::context([page_schema()]);
    let pages = ctx.query("Page")?;
    let mut home = pages.create(doc! { "title": "Home", "day_count": 1 }).await?;

    home.increment(&ctx, "day_count", 2.7).await?;
    assert_eq!(home.read("day_count"), Bson::Int64(3));
    assert_eq!(pages.find_strict(home.id()).await?.read("day_count"), Bson::Int64(3));

    pages.increment("day_count", 0.5).await?;
    assert_eq!(pages.find_strict(home.id()).await?.read("day_count"), Bson::Int64(3));
    Ok(())
}

#[tokio::test]
async fn find_and_modify_honours_the_offset() -> MapperResult<()> {
    let ctx = common::context([page_schema()]);
    let pages = ctx.query("Page")?;
    pages
        .create_many(vec![
            doc! { "title": "a", "day_count": 1 },
            doc! { "title": "b", "day_count": 2 },
            doc! { "title": "c", "day_count": 3 },
        ])
        .await?;

    let modified = pages
        .sort(["day_count"])
        .offset(1)
        .find_and_modify(Update::new().set("title", "picked"), ModifyOptions::new().return_new())
        .await?;
    assert_eq!(modified.and_then(|page| page.read("day_count").as_i64()), Some(2));
    assert!(pages.find_by("title", "b").await?.is_none());
    Ok(())
}
