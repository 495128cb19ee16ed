//! Association descriptors and their resolution against a [`Context`].
//!
//! Five kinds are supported:
//!
//! - [`AssociationKind::BelongsTo`]: the owner holds `{name}_id` (and `{name}_type` when
//!   polymorphic). See [`Document::parent`] and [`Document::set_parent`].
//! - [`AssociationKind::Many`]: target documents hold a foreign key pointing back at the
//!   owner. [`Document::related`] returns a [`DocumentQuery`] over them.
//! - [`AssociationKind::InArray`]: the owner holds an array of target ids.
//! - [`AssociationKind::EmbeddedOne`] / [`AssociationKind::EmbeddedMany`]: targets are
//!   stored inline in the owner's record and saved with it.

use bson::Bson;
use std::{collections::HashMap, fmt, sync::Arc};

use crate::{
    context::Context,
    document::{Document, Embedded},
    error::{MapperError, MapperResult},
    finder::DocumentQuery,
    keys::ID_KEY,
    query::{Criteria, Filter, Sort},
    schema::{Schema, class_name, foreign_key},
    types::{id_from_bson, id_to_bson},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationKind {
    BelongsTo,
    Many,
    InArray,
    EmbeddedOne,
    EmbeddedMany,
}

impl AssociationKind {
    pub fn is_embedded(self) -> bool {
        matches!(self, AssociationKind::EmbeddedOne | AssociationKind::EmbeddedMany)
    }
}

/// What happens to related documents when the owner is destroyed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Dependent {
    #[default]
    None,
    /// Destroy every related document, running its callbacks, before the owner.
    Destroy,
}

/// A named refinement available on an association's query.
pub type Extension = Arc<dyn Fn(DocumentQuery) -> DocumentQuery + Send + Sync>;

#[derive(Clone)]
enum Target {
    Named(String),
    Embedded(Arc<Schema>),
}

/// Options of a referenced association.
#[derive(Clone, Default)]
pub struct AssociationOptions {
    class_name: Option<String>,
    foreign_key: Option<String>,
    polymorphic: bool,
    as_owner: Option<String>,
    dependent: Dependent,
    criteria: Criteria,
    extensions: HashMap<String, Extension>,
}

impl AssociationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Target schema name, when it is not the inflected association name.
    pub fn class_name(mut self, name: impl Into<String>) -> Self {
        self.class_name = Some(name.into());
        self
    }

    pub fn foreign_key(mut self, key: impl Into<String>) -> Self {
        self.foreign_key = Some(key.into());
        self
    }

    /// Stores the target's schema name next to the foreign key.
    pub fn polymorphic(mut self) -> Self {
        self.polymorphic = true;
        self
    }

    /// Matches targets through a polymorphic `belongs_to` named `name` on the target.
    pub fn as_owner(mut self, name: impl Into<String>) -> Self {
        self.as_owner = Some(name.into());
        self
    }

    pub fn dependent_destroy(mut self) -> Self {
        self.dependent = Dependent::Destroy;
        self
    }

    pub fn sort<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Sort>,
    {
        self.criteria = self.criteria.sort(fields);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.criteria = self.criteria.limit(limit);
        self
    }

    /// Extra conditions every related document must match.
    pub fn filter(mut self, conditions: bson::Document) -> Self {
        self.criteria = self.criteria.filter(conditions);
        self
    }

    /// Declares a named refinement, applied with [`DocumentQuery::extension`].
    pub fn extension<F>(mut self, name: impl Into<String>, extend: F) -> Self
    where
        F: Fn(DocumentQuery) -> DocumentQuery + Send + Sync + 'static,
    {
        self.extensions.insert(name.into(), Arc::new(extend));
        self
    }
}

/// A resolved association declaration.
#[derive(Clone)]
pub struct Association {
    name: String,
    kind: AssociationKind,
    target: Target,
    foreign_key: String,
    type_key: Option<String>,
    dependent: Dependent,
    criteria: Criteria,
    extensions: HashMap<String, Extension>,
}

impl Association {
    pub(crate) fn belongs_to(name: String, options: AssociationOptions) -> Self {
        let foreign_key = options
            .foreign_key
            .unwrap_or_else(|| format!("{name}_id"));
        let type_key = options
            .polymorphic
            .then(|| format!("{name}_type"));

        Self {
            target: Target::Named(options.class_name.unwrap_or_else(|| class_name(&name))),
            kind: AssociationKind::BelongsTo,
            foreign_key,
            type_key,
            dependent: options.dependent,
            criteria: options.criteria,
            extensions: options.extensions,
            name,
        }
    }

    pub(crate) fn many(name: String, target: String, owner: &str, options: AssociationOptions) -> Self {
        let (foreign_key, type_key) = match &options.as_owner {
            Some(as_owner) => (format!("{as_owner}_id"), Some(format!("{as_owner}_type"))),
            None => (options.foreign_key.unwrap_or_else(|| foreign_key(owner)), None),
        };

        Self {
            target: Target::Named(options.class_name.unwrap_or(target)),
            kind: AssociationKind::Many,
            foreign_key,
            type_key,
            dependent: options.dependent,
            criteria: options.criteria,
            extensions: options.extensions,
            name,
        }
    }

    pub(crate) fn in_array(name: String, target: String, ids_key: String, options: AssociationOptions) -> Self {
        Self {
            target: Target::Named(options.class_name.unwrap_or(target)),
            kind: AssociationKind::InArray,
            foreign_key: ids_key,
            type_key: None,
            dependent: options.dependent,
            criteria: options.criteria,
            extensions: options.extensions,
            name,
        }
    }

    pub(crate) fn embedded(name: String, kind: AssociationKind, schema: Arc<Schema>) -> Self {
        Self {
            foreign_key: name.clone(),
            target: Target::Embedded(schema),
            kind,
            type_key: None,
            dependent: Dependent::None,
            criteria: Criteria::new(),
            extensions: HashMap::new(),
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> AssociationKind {
        self.kind
    }

    /// Name of the target schema. For a polymorphic `belongs_to` this is only the
    /// declared default; the stored type key decides at load time.
    pub fn target_name(&self) -> &str {
        match &self.target {
            Target::Named(name) => name,
            Target::Embedded(schema) => schema.name(),
        }
    }

    pub fn embedded_schema(&self) -> Option<&Arc<Schema>> {
        match &self.target {
            Target::Embedded(schema) => Some(schema),
            Target::Named(_) => None,
        }
    }

    /// The key holding the reference: the owner's `{name}_id`, the target's back
    /// reference, or the owner's id array.
    pub fn foreign_key(&self) -> &str {
        &self.foreign_key
    }

    pub fn type_key(&self) -> Option<&str> {
        self.type_key.as_deref()
    }

    pub fn is_polymorphic(&self) -> bool {
        self.type_key.is_some()
    }

    pub fn dependent(&self) -> Dependent {
        self.dependent
    }

    pub fn criteria(&self) -> &Criteria {
        &self.criteria
    }

    pub fn extensions(&self) -> &HashMap<String, Extension> {
        &self.extensions
    }
}

impl fmt::Debug for Association {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Association")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("target", &self.target_name())
            .field("foreign_key", &self.foreign_key)
            .field("type_key", &self.type_key)
            .field("dependent", &self.dependent)
            .finish()
    }
}

fn lookup<'s>(schema: &'s Schema, name: &str, kinds: &[AssociationKind]) -> MapperResult<&'s Association> {
    schema
        .association(name)
        .filter(|association| kinds.contains(&association.kind()))
        .ok_or_else(|| MapperError::UnknownAssociation(schema.name().to_string(), name.to_string()))
}

impl Document {
    /// Loads the document referenced by a `belongs_to` association.
    ///
    /// Returns `None` when the foreign key is unset or the target no longer exists.
    pub async fn parent(&self, ctx: &Context, name: &str) -> MapperResult<Option<Document>> {
        let association = lookup(&self.schema, name, &[AssociationKind::BelongsTo])?;

        let Some(id) = id_from_bson(&self.read(association.foreign_key())) else {
            return Ok(None);
        };

        let target = match association.type_key() {
            Some(type_key) => match self.read(type_key) {
                Bson::String(type_name) => ctx.schema(&type_name)?,
                _ => return Ok(None),
            },
            None => ctx.schema(association.target_name())?,
        };

        ctx.query_schema(&target).find(id).await
    }

    /// Points a `belongs_to` association at `parent`, or clears it with `None`.
    ///
    /// # Errors
    ///
    /// Returns [`MapperError::InvalidArgument`] when a non-polymorphic association is
    /// given a document of another schema.
    pub fn set_parent(&mut self, name: &str, parent: Option<&Document>) -> MapperResult<()> {
        let schema = self.schema.clone();
        let association = lookup(&schema, name, &[AssociationKind::BelongsTo])?;

        match parent {
            Some(parent) => {
                let parent_schema = parent.schema();
                if !association.is_polymorphic()
                    && parent_schema.name() != association.target_name()
                    && !parent_schema.inherits_from(association.target_name())
                {
                    return Err(MapperError::InvalidArgument(format!(
                        "{name} expects a {}, got a {}",
                        association.target_name(),
                        parent_schema.name()
                    )));
                }

                self.write(association.foreign_key(), id_to_bson(parent.id()));
                if let Some(type_key) = association.type_key() {
                    self.write(type_key, parent_schema.name());
                }
            }
            None => {
                self.write(association.foreign_key(), Bson::Null);
                if let Some(type_key) = association.type_key() {
                    self.write(type_key, Bson::Null);
                }
            }
        }

        Ok(())
    }

    /// A query over the documents of a `many` or `many_in` association.
    ///
    /// The declared ordering, limit and extensions of the association are attached.
    /// For `many`, documents built or created through the query get the foreign key
    /// (and type key) preset.
    pub fn related(&self, ctx: &Context, name: &str) -> MapperResult<DocumentQuery> {
        let association = lookup(
            &self.schema,
            name,
            &[AssociationKind::Many, AssociationKind::InArray],
        )?;

        Ok(self
            .owned_by(ctx, association)?
            .merge(association.criteria())
            .with_extensions(association.extensions().clone()))
    }

    /// Every document an association points at, keyed only by the owner.
    pub(crate) fn owned_by(&self, ctx: &Context, association: &Association) -> MapperResult<DocumentQuery> {
        let target = ctx.schema(association.target_name())?;
        let query = ctx.query_schema(&target);

        let query = match association.kind() {
            AssociationKind::InArray => {
                let ids = match self.read(association.foreign_key()) {
                    Bson::Array(ids) => ids,
                    _ => Vec::new(),
                };
                query.filter_expr(Filter::any_of(ID_KEY, ids))
            }
            _ => {
                let owner = id_to_bson(self.id);
                let mut creation = bson::Document::new();
                creation.insert(association.foreign_key(), owner.clone());
                let mut query = query.filter_expr(Filter::eq(association.foreign_key(), owner));

                if let Some(type_key) = association.type_key() {
                    query = query.filter_expr(Filter::eq(type_key, self.schema.name()));
                    creation.insert(type_key, self.schema.name());
                }

                query.with_creation(creation)
            }
        };

        Ok(query)
    }

    /// Adds a document's id to a `many_in` association, unless it is already present.
    pub fn push_reference(&mut self, name: &str, target: &Document) -> MapperResult<()> {
        let schema = self.schema.clone();
        let association = lookup(&schema, name, &[AssociationKind::InArray])?;

        let mut ids = match self.read(association.foreign_key()) {
            Bson::Array(ids) => ids,
            _ => Vec::new(),
        };
        let id = id_to_bson(target.id());
        if !ids.contains(&id) {
            ids.push(id);
            self.write(association.foreign_key(), ids);
        }

        Ok(())
    }

    /// Removes a document's id from a `many_in` association.
    pub fn remove_reference(&mut self, name: &str, target: &Document) -> MapperResult<()> {
        let schema = self.schema.clone();
        let association = lookup(&schema, name, &[AssociationKind::InArray])?;

        if let Bson::Array(mut ids) = self.read(association.foreign_key()) {
            let id = id_to_bson(target.id());
            ids.retain(|existing| *existing != id);
            self.write(association.foreign_key(), ids);
        }

        Ok(())
    }

    pub fn embedded_one(&self, name: &str) -> MapperResult<Option<&Document>> {
        lookup(&self.schema, name, &[AssociationKind::EmbeddedOne])?;

        Ok(match self.embedded.get(name) {
            Some(Embedded::One(Some(document))) => Some(document.as_ref()),
            _ => None,
        })
    }

    /// Mutable access to a single embedded document. Marks the association changed.
    pub fn embedded_one_mut(&mut self, name: &str) -> MapperResult<Option<&mut Document>> {
        lookup(&self.schema, name, &[AssociationKind::EmbeddedOne])?;
        self.embedded_will_change(name);

        Ok(match self.embedded.get_mut(name) {
            Some(Embedded::One(Some(document))) => Some(document.as_mut()),
            _ => None,
        })
    }

    pub fn set_embedded_one(&mut self, name: &str, document: Option<Document>) -> MapperResult<()> {
        let schema = self.schema.clone();
        let association = lookup(&schema, name, &[AssociationKind::EmbeddedOne])?;
        if let Some(document) = &document {
            check_embedded_schema(association, document)?;
        }

        self.embedded_will_change(name);
        self.embedded
            .insert(name.to_string(), Embedded::One(document.map(Box::new)));
        Ok(())
    }

    pub fn embedded_many(&self, name: &str) -> MapperResult<&[Document]> {
        lookup(&self.schema, name, &[AssociationKind::EmbeddedMany])?;

        Ok(match self.embedded.get(name) {
            Some(Embedded::Many(documents)) => documents,
            _ => &[],
        })
    }

    /// Mutable access to an embedded list. Marks the association changed.
    pub fn embedded_many_mut(&mut self, name: &str) -> MapperResult<&mut Vec<Document>> {
        lookup(&self.schema, name, &[AssociationKind::EmbeddedMany])?;
        self.embedded_will_change(name);

        let slot = self
            .embedded
            .entry(name.to_string())
            .or_insert_with(|| Embedded::Many(Vec::new()));
        if !matches!(slot, Embedded::Many(_)) {
            *slot = Embedded::Many(Vec::new());
        }

        match slot {
            Embedded::Many(documents) => Ok(documents),
            Embedded::One(_) => Err(MapperError::UnknownAssociation(
                self.schema.name().to_string(),
                name.to_string(),
            )),
        }
    }

    /// Builds an embedded document in place: appended to a list, or replacing a single one.
    pub fn build_embedded(&mut self, name: &str, attributes: bson::Document) -> MapperResult<&mut Document> {
        let schema = self.schema.clone();
        let association = lookup(
            &schema,
            name,
            &[AssociationKind::EmbeddedOne, AssociationKind::EmbeddedMany],
        )?;
        let Some(target) = association.embedded_schema() else {
            return Err(MapperError::UnknownAssociation(schema.name().to_string(), name.to_string()));
        };
        let built = Document::with_attributes(target, attributes);

        if association.kind() == AssociationKind::EmbeddedOne {
            self.set_embedded_one(name, Some(built))?;
            return self
                .embedded_one_mut(name)?
                .ok_or_else(|| MapperError::UnknownAssociation(schema.name().to_string(), name.to_string()));
        }

        let documents = self.embedded_many_mut(name)?;
        documents.push(built);
        let last = documents.len() - 1;
        Ok(&mut documents[last])
    }

    fn embedded_will_change(&mut self, name: &str) {
        if !self.initializing {
            let current = self.read(name);
            self.changes.will_change(name, current);
        }
    }
}

fn check_embedded_schema(association: &Association, document: &Document) -> MapperResult<()> {
    let expected = association.target_name();
    let actual = document.schema();
    if actual.name() == expected || actual.inherits_from(expected) {
        Ok(())
    } else {
        Err(MapperError::InvalidArgument(format!(
            "{} expects an embedded {expected}, got a {}",
            association.name(),
            actual.name()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::KeyType;
    use bson::doc;

    fn comment() -> Arc<Schema> {
        Schema::builder("Comment")
            .key("body", KeyType::String)
            .belongs_to_with("commentable", AssociationOptions::new().polymorphic())
            .build()
    }

    #[test]
    fn foreign_keys_are_inferred() {
        let post = Schema::builder("BlogPost")
            .many("comments", "Comment", AssociationOptions::new())
            .belongs_to("author")
            .build();

        let comments = post.association("comments").unwrap();
        assert_eq!(comments.foreign_key(), "blog_post_id");
        assert_eq!(comments.target_name(), "Comment");

        let author = post.association("author").unwrap();
        assert_eq!(author.foreign_key(), "author_id");
        assert_eq!(author.target_name(), "Author");
        assert!(post.keys().contains("author_id"));
    }

    #[test]
    fn polymorphic_references_declare_a_type_key() {
        let schema = comment();
        let association = schema.association("commentable").unwrap();

        assert_eq!(association.type_key(), Some("commentable_type"));
        assert!(schema.keys().contains("commentable_type"));
    }

    #[test]
    fn setting_a_parent_writes_both_keys() {
        let post = Schema::builder("Post").build();
        let parent = Document::new(&post);
        let mut child = Document::new(&comment());

        child.set_parent("commentable", Some(&parent)).unwrap();
        assert_eq!(child.read("commentable_id"), id_to_bson(parent.id()));
        assert_eq!(child.read("commentable_type"), Bson::String("Post".into()));

        child.set_parent("commentable", None).unwrap();
        assert_eq!(child.read("commentable_id"), Bson::Null);
        assert_eq!(child.read("commentable_type"), Bson::Null);
    }

    #[test]
    fn typed_references_reject_other_schemas() {
        let user = Schema::builder("User").build();
        let post = Schema::builder("Post").belongs_to("author").build();
        let author = Document::new(&user);
        let mut document = Document::new(&post);

        assert!(matches!(
            document.set_parent("author", Some(&author)),
            Err(MapperError::InvalidArgument(_))
        ));
    }

    #[test]
    fn unknown_associations_are_errors() {
        let document = Document::new(&comment());
        assert!(matches!(
            document.embedded_many("replies"),
            Err(MapperError::UnknownAssociation(_, _))
        ));
    }

    #[test]
    fn references_are_unique() {
        let tag = Schema::builder("Tag").build();
        let post = Schema::builder("Post")
            .many_in("tags", "Tag", "tag_ids", AssociationOptions::new())
            .build();
        let rust = Document::new(&tag);
        let mut document = Document::new(&post);

        document.push_reference("tags", &rust).unwrap();
        document.push_reference("tags", &rust).unwrap();
        assert_eq!(document.read("tag_ids"), Bson::Array(vec![id_to_bson(rust.id())]));

        document.remove_reference("tags", &rust).unwrap();
        assert_eq!(document.read("tag_ids"), Bson::Array(Vec::new()));
    }

    #[test]
    fn embedded_documents_live_in_the_owner_record() {
        let address = Schema::embedded("Address")
            .key("city", KeyType::String)
            .build();
        let person = Schema::builder("Person")
            .many_embedded("addresses", address.clone())
            .one_embedded("home", address)
            .build();
        let mut document = Document::new(&person);

        document
            .build_embedded("addresses", doc! { "city": "Oslo" })
            .unwrap();
        document
            .build_embedded("home", doc! { "city": "Bergen" })
            .unwrap();

        let record = document.to_record();
        let addresses = record.get_array("addresses").unwrap();
        assert_eq!(addresses.len(), 1);
        assert_eq!(
            record.get_document("home").unwrap().get_str("city").unwrap(),
            "Bergen"
        );
        assert!(document.attribute_changed("addresses"));
    }
}
