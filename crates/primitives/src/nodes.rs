//! Nodes: the app's typed note collection
//!
//! A node is a text snippet, an image or a file, authored by one user and
//! stamped with creation and update times in milliseconds since the epoch.
//!
//! ## Schema (`nodes`, version 0)
//!
//! | Field         | Type   | Required |
//! |---------------|--------|----------|
//! | `type`        | string | yes      |
//! | `createdAt`   | number | yes      |
//! | `updatedAt`   | number | yes      |
//! | `authorId`    | string | yes      |
//! | `text`        | string |          |
//! | `name`        | string |          |
//! | `originalUrl` | string |          |
//! | `localUrl`    | string |          |
//! | `webUrl`      | string |          |
//! | `extension`   | string |          |
//!
//! `createdAt` is indexed; the app's main list is `newest_first()`.
//!
//! ## Design
//!
//! `NodeCollection` is a stateless facade over a registered
//! [`Collection`]; every operation delegates to the engine, so handles can
//! be cloned freely and shared across threads.

use chrono::Utc;
use kipu_core::error::{Error, Result};
use kipu_core::{
    CollectionSchema, Document, DocumentId, FieldType, Fields, Predicate, Query, Revision, Value,
};
use kipu_engine::{Changes, Collection, Database, Snapshot, Subscription};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Collection name
pub const NODES: &str = "nodes";

// Field names as stored
const TYPE: &str = "type";
const CREATED_AT: &str = "createdAt";
const UPDATED_AT: &str = "updatedAt";
const AUTHOR_ID: &str = "authorId";
const TEXT: &str = "text";
const NAME: &str = "name";
const ORIGINAL_URL: &str = "originalUrl";
const LOCAL_URL: &str = "localUrl";
const WEB_URL: &str = "webUrl";
const EXTENSION: &str = "extension";

/// Kind of content a node holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    /// Plain text
    Text,
    /// Image with local and original locations
    Image,
    /// Arbitrary file with an extension
    File,
}

impl NodeType {
    /// Stored representation
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Text => "text",
            NodeType::Image => "image",
            NodeType::File => "file",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(NodeType::Text),
            "image" => Ok(NodeType::Image),
            "file" => Ok(NodeType::File),
            other => Err(Error::SerializationError(format!(
                "unknown node type '{}'",
                other
            ))),
        }
    }
}

/// Identity of the user who created a node
///
/// Supplied by the caller; the store only checks that one is present.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AuthorId(String);

impl AuthorId {
    /// Wrap an author identity
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AuthorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AuthorId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AuthorId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Schema of the `nodes` collection
pub fn node_schema() -> Result<CollectionSchema> {
    CollectionSchema::builder(NODES)
        .version(0)
        .required(TYPE, FieldType::String)
        .required(CREATED_AT, FieldType::Number)
        .required(UPDATED_AT, FieldType::Number)
        .required(AUTHOR_ID, FieldType::String)
        .optional(TEXT, FieldType::String)
        .optional(NAME, FieldType::String)
        .optional(ORIGINAL_URL, FieldType::String)
        .optional(LOCAL_URL, FieldType::String)
        .optional(WEB_URL, FieldType::String)
        .optional(EXTENSION, FieldType::String)
        .index(CREATED_AT)
        .build()
}

/// Current time in milliseconds since the epoch
fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// A stored node
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    doc: Document,
    node_type: NodeType,
}

impl Node {
    /// Primary key
    pub fn id(&self) -> &DocumentId {
        &self.doc.id
    }

    /// Revision this node was read at
    pub fn revision(&self) -> Revision {
        self.doc.revision
    }

    /// Content kind
    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    /// Creation time, milliseconds since the epoch
    pub fn created_at(&self) -> i64 {
        self.millis(CREATED_AT)
    }

    /// Last update time, milliseconds since the epoch
    pub fn updated_at(&self) -> i64 {
        self.millis(UPDATED_AT)
    }

    /// Author identity
    pub fn author_id(&self) -> AuthorId {
        AuthorId::new(self.doc.get_str(AUTHOR_ID).unwrap_or_default())
    }

    /// Text content
    pub fn text(&self) -> Option<&str> {
        self.doc.get_str(TEXT)
    }

    /// Display name of an image or file
    pub fn name(&self) -> Option<&str> {
        self.doc.get_str(NAME)
    }

    /// Where the content was originally fetched from
    pub fn original_url(&self) -> Option<&str> {
        self.doc.get_str(ORIGINAL_URL)
    }

    /// Location of the on-device copy
    pub fn local_url(&self) -> Option<&str> {
        self.doc.get_str(LOCAL_URL)
    }

    /// Public location, once uploaded
    pub fn web_url(&self) -> Option<&str> {
        self.doc.get_str(WEB_URL)
    }

    /// File extension
    pub fn extension(&self) -> Option<&str> {
        self.doc.get_str(EXTENSION)
    }

    /// Icon to show for this node
    pub fn file_icon_name(&self) -> &'static str {
        "file"
    }

    /// Underlying document
    pub fn document(&self) -> &Document {
        &self.doc
    }

    /// Consume into the underlying document
    pub fn into_document(self) -> Document {
        self.doc
    }

    // Number fields may come back as floats from other writers
    fn millis(&self, field: &str) -> i64 {
        self.doc
            .get(field)
            .and_then(|v| v.as_int().or_else(|| v.as_float().map(|f| f as i64)))
            .unwrap_or_default()
    }
}

impl TryFrom<Document> for Node {
    type Error = Error;

    fn try_from(doc: Document) -> Result<Self> {
        if doc.collection != NODES {
            return Err(Error::InvalidQuery(format!(
                "document belongs to '{}', not '{}'",
                doc.collection, NODES
            )));
        }
        let node_type = doc
            .get_str(TYPE)
            .ok_or_else(|| Error::SerializationError("node has no type".to_string()))?
            .parse::<NodeType>()?;
        Ok(Node { doc, node_type })
    }
}

/// Convert a live query snapshot into nodes, in snapshot order
pub fn nodes_of(snapshot: Snapshot) -> Result<Vec<Node>> {
    snapshot.into_iter().map(Node::try_from).collect()
}

/// Typed handle to the `nodes` collection
///
/// # Example
///
/// ```ignore
/// let nodes = NodeCollection::register(&db)?;
/// let node = nodes.init_text_node("hello", &AuthorId::from("alice"))?;
/// let mut feed = nodes.newest_first()?;
/// if let Some(snapshot) = feed.latest() {
///     render(nodes_of(snapshot)?);
/// }
/// ```
#[derive(Clone, Debug)]
pub struct NodeCollection {
    collection: Collection,
}

impl NodeCollection {
    /// Declare the `nodes` collection on `db` and return its handle
    ///
    /// Idempotent for the same database.
    pub fn register(db: &Arc<Database>) -> Result<Self> {
        let collection = db.register_collection(node_schema()?)?;
        Ok(Self { collection })
    }

    /// Underlying untyped collection
    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    /// Create a text node
    pub fn init_text_node(&self, text: &str, author: &AuthorId) -> Result<Node> {
        let mut fields = Self::base_fields(NodeType::Text, author);
        fields.insert(TEXT.to_string(), Value::from(text));
        self.insert(fields)
    }

    /// Create an image node
    pub fn init_image_node(
        &self,
        name: &str,
        local_url: &str,
        original_url: &str,
        author: &AuthorId,
    ) -> Result<Node> {
        let mut fields = Self::base_fields(NodeType::Image, author);
        fields.insert(NAME.to_string(), Value::from(name));
        fields.insert(LOCAL_URL.to_string(), Value::from(local_url));
        fields.insert(ORIGINAL_URL.to_string(), Value::from(original_url));
        self.insert(fields)
    }

    /// Create a file node
    pub fn init_file_node(
        &self,
        name: &str,
        local_url: &str,
        original_url: &str,
        extension: &str,
        author: &AuthorId,
    ) -> Result<Node> {
        let mut fields = Self::base_fields(NodeType::File, author);
        fields.insert(NAME.to_string(), Value::from(name));
        fields.insert(LOCAL_URL.to_string(), Value::from(local_url));
        fields.insert(ORIGINAL_URL.to_string(), Value::from(original_url));
        fields.insert(EXTENSION.to_string(), Value::from(extension));
        self.insert(fields)
    }

    /// Replace a node's text and stamp `updatedAt`
    ///
    /// Retries on a concurrent update, so the text always lands on the latest
    /// revision.
    pub fn set_text(&self, id: &DocumentId, text: &str) -> Result<Node> {
        let changes = Changes::new()
            .set(TEXT, text)
            .set(UPDATED_AT, now_millis());
        let doc = self.collection.update(id, &changes)?;
        debug!(target: "kipu::mutation", %id, revision = %doc.revision, "Node text set");
        Node::try_from(doc)
    }

    /// Look up a node by id
    pub fn get(&self, id: &DocumentId) -> Result<Option<Node>> {
        self.collection.get(id)?.map(Node::try_from).transpose()
    }

    /// Remove a node
    pub fn remove(&self, id: &DocumentId) -> Result<Revision> {
        self.collection.remove(id)
    }

    /// Nodes whose original or web location is `link`, newest first
    pub fn all_by_link(&self, link: &str) -> Result<Vec<Node>> {
        let query = self
            .collection
            .query()
            .filter(Predicate::eq(ORIGINAL_URL, link).or(Predicate::eq(WEB_URL, link)))
            .sort_desc(CREATED_AT)
            .build();
        nodes_of(self.collection.find(&query)?)
    }

    /// Query for every node, newest first
    pub fn newest_first_query(&self) -> Query {
        self.collection.query().sort_desc(CREATED_AT).build()
    }

    /// Live list of every node, newest first
    pub fn newest_first(&self) -> Result<Subscription> {
        self.collection.subscribe(self.newest_first_query())
    }

    fn base_fields(node_type: NodeType, author: &AuthorId) -> Fields {
        let now = now_millis();
        let mut fields = Fields::new();
        fields.insert(TYPE.to_string(), Value::from(node_type.as_str()));
        fields.insert(CREATED_AT.to_string(), Value::Int(now));
        fields.insert(UPDATED_AT.to_string(), Value::Int(now));
        fields.insert(AUTHOR_ID.to_string(), Value::from(author.as_str()));
        fields
    }

    fn insert(&self, fields: Fields) -> Result<Node> {
        let doc = self.collection.insert(fields)?;
        Node::try_from(doc)
    }
}
