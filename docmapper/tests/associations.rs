mod common;

use docmapper::{prelude::*, types::id_to_bson};
use std::sync::Arc;

fn library() -> Vec<Arc<Schema>> {
    let author = Schema::builder("Author")
        .key("name", KeyType::String)
        .many(
            "books",
            "Book",
            AssociationOptions::new()
                .sort(["title"])
                .dependent_destroy()
                .extension("classics", |books| books.filter(doc! { "year.lt": 1950 })),
        )
        .build();
    let book = Schema::builder("Book")
        .key("title", KeyType::String)
        .key("year", KeyType::Integer)
        .belongs_to("author")
        .build();
    vec![author, book]
}

#[tokio::test]
async fn many_and_belongs_to_resolve_each_other() -> MapperResult<()> {
    let ctx = common::context(library());
    let mut author = ctx.query("Author")?.create(doc! { "name": "Le Guin" }).await?;

    let books = author.related(&ctx, "books")?;
    books.create(doc! { "title": "The Lathe of Heaven", "year": 1971 }).await?;
    books.create(doc! { "title": "A Wizard of Earthsea", "year": 1968 }).await?;

    let titles = common::texts(&books.all().await?, "title");
    assert_eq!(titles, ["A Wizard of Earthsea", "The Lathe of Heaven"]);

    let first = books.first().await?;
    let Some(book) = first else {
        panic!("related books are missing");
    };
    assert_eq!(book.read("author_id"), id_to_bson(author.id()));

    let parent = book.parent(&ctx, "author").await?;
    assert_eq!(parent.map(|parent| parent.id()), Some(author.id()));

    assert!(author.destroy(&ctx).await?);
    assert_eq!(ctx.query("Book")?.count().await?, 0);
    Ok(())
}

#[tokio::test]
async fn association_extensions_refine_the_related_query() -> MapperResult<()> {
    let ctx = common::context(library());
    let author = ctx.query("Author")?.create(doc! { "name": "Orwell" }).await?;
    let books = author.related(&ctx, "books")?;
    books.create(doc! { "title": "Animal Farm", "year": 1945 }).await?;
    books.create(doc! { "title": "Nineteen Eighty-Four", "year": 1949 }).await?;
    ctx.query("Book")?.create(doc! { "title": "Unrelated", "year": 1900 }).await?;

    assert_eq!(books.extension("classics")?.count().await?, 2);
    assert!(matches!(books.extension("modern"), Err(MapperError::InvalidArgument(_))));
    Ok(())
}

#[tokio::test]
async fn set_parent_checks_the_target_schema() -> MapperResult<()> {
    let ctx = common::context(library());
    let author = ctx.query("Author")?.create(doc! { "name": "Tolkien" }).await?;
    let mut book = ctx.query("Book")?.build(doc! { "title": "The Hobbit" });
    let other = ctx.query("Book")?.build(doc! { "title": "Not an author" });

    book.set_parent("author", Some(&author))?;
    assert!(book.attribute_changed("author_id"));
    assert!(book.save(&ctx).await?);
    assert_eq!(author.related(&ctx, "books")?.count().await?, 1);

    assert!(matches!(
        book.set_parent("author", Some(&other)),
        Err(MapperError::InvalidArgument(_))
    ));
    assert!(matches!(
        book.set_parent("publisher", Some(&author)),
        Err(MapperError::UnknownAssociation(..))
    ));

    book.set_parent("author", None)?;
    assert!(book.parent(&ctx, "author").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn a_refusing_dependent_fails_the_cascade() -> MapperResult<()> {
    let blog = Schema::builder("Blog")
        .key("name", KeyType::String)
        .many("entries", "Entry", AssociationOptions::new().dependent_destroy())
        .build();
    let entry = Schema::builder("Entry")
        .key("title", KeyType::String)
        .belongs_to("blog")
        .on(Phase::BeforeDestroy, |_: &mut Document| false)
        .build();
    let ctx = common::context([blog, entry]);

    let mut blog = ctx.query("Blog")?.create(doc! { "name": "Notes" }).await?;
    blog.related(&ctx, "entries")?.create(doc! { "title": "Pinned" }).await?;

    let destroyed = blog.destroy(&ctx).await;
    assert!(matches!(destroyed, Err(MapperError::CascadeFailure(..))));
    assert!(blog.is_persisted());
    assert!(ctx.query("Blog")?.find(blog.id()).await?.is_some());
    assert_eq!(ctx.query("Entry")?.count().await?, 1);
    Ok(())
}

#[tokio::test]
async fn cascades_ignore_the_declared_limit_and_default_scope() -> MapperResult<()> {
    let owner = Schema::builder("Owner")
        .key("name", KeyType::String)
        .many("kids", "Kid", AssociationOptions::new().limit(1).dependent_destroy())
        .build();
    let kid = Schema::builder("Kid")
        .key("name", KeyType::String)
        .key_with("active", KeyType::Boolean, KeyOptions::new().default_value(true))
        .default_scope(Criteria::new().filter(doc! { "active": true }))
        .belongs_to("owner")
        .build();
    let ctx = common::context([owner, kid]);

    let mut owner = ctx.query("Owner")?.create(doc! { "name": "Pat" }).await?;
    let kids = owner.related(&ctx, "kids")?;
    let first = kids.create(doc! { "name": "a" }).await?;
    let second = kids.create(doc! { "name": "b" }).await?;
    let dormant = kids.create(doc! { "name": "c", "active": false }).await?;
    assert_eq!(kids.all().await?.len(), 1);

    assert!(owner.destroy(&ctx).await?);
    let remaining = ctx.query("Kid")?.unscoped();
    for kid in [&first, &second, &dormant] {
        assert!(remaining.find(kid.id()).await?.is_none());
    }
    Ok(())
}

#[tokio::test]
async fn polymorphic_owners() -> MapperResult<()> {
    let comment = Schema::builder("Comment")
        .key("body", KeyType::String)
        .belongs_to_with("commentable", AssociationOptions::new().polymorphic())
        .build();
    let photo = Schema::builder("Photo")
        .key("caption", KeyType::String)
        .many("comments", "Comment", AssociationOptions::new().as_owner("commentable"))
        .build();
    let video = Schema::builder("Video")
        .key("caption", KeyType::String)
        .many("comments", "Comment", AssociationOptions::new().as_owner("commentable"))
        .build();
    let ctx = common::context([comment, photo, video]);

    let photo = ctx.query("Photo")?.create(doc! { "caption": "Sunset" }).await?;
    let video = ctx.query("Video")?.create(doc! { "caption": "Timelapse" }).await?;

    photo.related(&ctx, "comments")?.create(doc! { "body": "Lovely" }).await?;
    video.related(&ctx, "comments")?.create(doc! { "body": "Fast" }).await?;
    video.related(&ctx, "comments")?.create(doc! { "body": "Again" }).await?;

    assert_eq!(photo.related(&ctx, "comments")?.count().await?, 1);
    assert_eq!(video.related(&ctx, "comments")?.count().await?, 2);

    let lovely = ctx.query("Comment")?.find_by("body", "Lovely").await?;
    let Some(lovely) = lovely else {
        panic!("comment is missing");
    };
    assert_eq!(common::text(&lovely, "commentable_type"), "Photo");

    let owner = lovely.parent(&ctx, "commentable").await?;
    let Some(owner) = owner else {
        panic!("owner is missing");
    };
    assert_eq!(owner.schema().name(), "Photo");
    assert_eq!(owner.id(), photo.id());
    Ok(())
}

#[tokio::test]
async fn ids_held_in_an_array() -> MapperResult<()> {
    let tag = Schema::builder("Tag").key("label", KeyType::String).build();
    let post = Schema::builder("Post")
        .key("title", KeyType::String)
        .many_in("tags", "Tag", "tag_ids", AssociationOptions::new().sort(["label"]))
        .build();
    let ctx = common::context([tag, post]);
    let tags = ctx.query("Tag")?;

    let rust = tags.create(doc! { "label": "rust" }).await?;
    let async_tag = tags.create(doc! { "label": "async" }).await?;
    tags.create(doc! { "label": "unused" }).await?;

    let mut post = ctx.query("Post")?.create(doc! { "title": "Futures" }).await?;
    post.push_reference("tags", &rust)?;
    post.push_reference("tags", &async_tag)?;
    post.push_reference("tags", &rust)?;
    assert!(post.attribute_changed("tag_ids"));
    assert!(post.save(&ctx).await?);

    let labels = common::texts(&post.related(&ctx, "tags")?.all().await?, "label");
    assert_eq!(labels, ["async", "rust"]);

    post.remove_reference("tags", &rust)?;
    post.remove_reference("tags", &async_tag)?;
    assert!(post.save(&ctx).await?);
    assert!(post.related(&ctx, "tags")?.is_empty().await?);

    let stored = ctx.query("Post")?.find_strict(post.id()).await?;
    assert_eq!(stored.read("tag_ids"), Bson::Array(vec![]));
    Ok(())
}

fn person_schema() -> Arc<Schema> {
    let address = Schema::embedded("Address")
        .key("city", KeyType::String)
        .build();
    let note = Schema::embedded("Note")
        .key("body", KeyType::String)
        .build();
    Schema::builder("Person")
        .key("name", KeyType::String)
        .one_embedded("address", address)
        .many_embedded("notes", note)
        .build()
}

#[tokio::test]
async fn embedded_documents_live_inside_their_owner() -> MapperResult<()> {
    let ctx = common::context([person_schema()]);
    let people = ctx.query("Person")?;

    let ann = people
        .create(doc! {
            "name": "Ann",
            "address": { "city": "Oslo" },
            "notes": [{ "body": "first" }]
        })
        .await?;

    let mut found = people.find_strict(ann.id()).await?;
    let city = found
        .embedded_one("address")?
        .map(|address| common::text(address, "city"));
    assert_eq!(city.as_deref(), Some("Oslo"));
    assert_eq!(common::texts(found.embedded_many("notes")?, "body"), ["first"]);
    assert!(!found.is_changed());

    if let Some(address) = found.embedded_one_mut("address")? {
        address.write("city", "Bergen");
    }
    found.build_embedded("notes", doc! { "body": "second" })?;
    assert!(found.attribute_changed("address"));
    assert!(found.attribute_changed("notes"));
    assert!(found.save(&ctx).await?);

    let reloaded = people.find_strict(ann.id()).await?;
    let city = reloaded
        .embedded_one("address")?
        .map(|address| common::text(address, "city"));
    assert_eq!(city.as_deref(), Some("Bergen"));
    assert_eq!(common::texts(reloaded.embedded_many("notes")?, "body"), ["first", "second"]);
    Ok(())
}

#[tokio::test]
async fn embedded_associations_check_their_schema() -> MapperResult<()> {
    let schema = person_schema();
    let mut person = Document::new(&schema);
    let stranger = Document::new(&schema);

    assert!(matches!(
        person.set_embedded_one("address", Some(stranger)),
        Err(MapperError::InvalidArgument(_))
    ));
    assert!(matches!(
        person.embedded_many("address"),
        Err(MapperError::UnknownAssociation(..))
    ));
    assert!(person.embedded_one("address")?.is_none());
    Ok(())
}

#[tokio::test]
async fn subclasses_share_the_parent_collection() -> MapperResult<()> {
    let animal = Schema::builder("Animal").key("name", KeyType::String).build();
    let dog = Schema::builder("Dog")
        .inherit(&animal)
        .key("breed", KeyType::String)
        .build();
    let ctx = common::context([animal, dog]);

    ctx.query("Animal")?.create(doc! { "name": "Generic" }).await?;
    ctx.query("Dog")?.create(doc! { "name": "Rex", "breed": "lab" }).await?;

    assert_eq!(ctx.query("Animal")?.count().await?, 2);
    assert_eq!(ctx.query("Dog")?.count().await?, 1);

    let rex = ctx.query("Animal")?.find_by("name", "Rex").await?;
    let Some(rex) = rex else {
        panic!("subclass record is missing");
    };
    assert_eq!(rex.schema().name(), "Dog");
    assert_eq!(common::text(&rex, "breed"), "lab");
    assert_eq!(common::text(&rex, "_type"), "Dog");
    Ok(())
}
