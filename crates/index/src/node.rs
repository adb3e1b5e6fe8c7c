//! Tree nodes and their page encoding.
//!
//! A node is either a leaf holding star records or an internal node naming
//! its four children. Children are referenced by cell identity and page id
//! only; there are no parent pointers, and resolving a child always goes
//! through the cache.
//!
//! ## Page encoding
//!
//! The page header carries the kind tag ([`PageType::Leaf`] or
//! [`PageType::Internal`]), the cell depth, the cell's packed identity and
//! the build generation. The payload is the postcard encoding of the star
//! list (leaf) or of the four `(uniq, page)` child pairs (internal).

use serde::{Deserialize, Serialize};
use starmap_store::{Error, Page, PageHeader, PageId, PageType, Result};
use starmap_types::{StarRecord, codec};

use crate::cell::CellId;

/// Reference from an internal node to one child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildRef {
    /// The child's cell.
    pub cell: CellId,
    /// Page holding the child's node.
    pub page: PageId,
}

/// In-memory form of one cell of the index tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// A cell whose stars are stored directly.
    Leaf {
        /// Stars whose positions map into this cell, in insertion order.
        stars: Vec<StarRecord>,
    },
    /// A cell that has been split into its four children.
    Internal {
        /// Children in nested-index order.
        children: [ChildRef; 4],
    },
}

impl Node {
    /// An empty leaf.
    pub fn empty_leaf() -> Self {
        Node::Leaf { stars: Vec::new() }
    }

    /// Whether this node is a leaf.
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }

    /// Stars held directly by this node (empty for internal nodes).
    pub fn stars(&self) -> &[StarRecord] {
        match self {
            Node::Leaf { stars } => stars,
            Node::Internal { .. } => &[],
        }
    }

    /// Child references of an internal node.
    pub fn children(&self) -> Option<&[ChildRef; 4]> {
        match self {
            Node::Leaf { .. } => None,
            Node::Internal { children } => Some(children),
        }
    }

    /// Approximate heap plus inline footprint, used for the cache budget.
    pub fn estimated_size(&self) -> usize {
        let inline = std::mem::size_of::<Node>();
        match self {
            Node::Leaf { stars } => inline + stars.capacity() * std::mem::size_of::<StarRecord>(),
            Node::Internal { .. } => inline,
        }
    }

    fn page_type(&self) -> PageType {
        match self {
            Node::Leaf { .. } => PageType::Leaf,
            Node::Internal { .. } => PageType::Internal,
        }
    }
}

/// Child pair as stored on the page.
#[derive(Serialize, Deserialize)]
struct WireChild {
    uniq: u64,
    page: PageId,
}

fn encode_payload(cell: CellId, node: &Node) -> Result<Vec<u8>> {
    let encoded = match node {
        Node::Leaf { stars } => codec::encode(stars),
        Node::Internal { children } => {
            let wire: [WireChild; 4] =
                children.map(|c| WireChild { uniq: c.cell.uniq(), page: c.page });
            codec::encode(&wire)
        },
    };
    encoded.map_err(|e| Error::Codec { message: format!("cell {cell}: {e}") })
}

/// Encoded payload size of `node` in bytes.
///
/// # Errors
///
/// Returns [`Error::Codec`] if the node cannot be serialized.
pub fn encoded_size(cell: CellId, node: &Node) -> Result<usize> {
    Ok(encode_payload(cell, node)?.len())
}

/// Serializes `node` into a fresh page for `cell`.
///
/// The checksum is filled in by [`PageStore::write`](starmap_store::PageStore::write).
///
/// # Errors
///
/// Returns [`Error::NodeTooLarge`] if the payload exceeds the page content
/// area, and [`Error::Codec`] if serialization fails.
pub fn encode_node(
    cell: CellId,
    node: &Node,
    generation: u64,
    page_id: PageId,
    page_size: usize,
) -> Result<Page> {
    let payload = encode_payload(cell, node)?;
    let header = PageHeader::new(node.page_type(), cell.depth(), cell.uniq(), generation);
    let mut page = Page::new(page_id, page_size, header);
    if payload.len() > page.content_size() {
        return Err(Error::NodeTooLarge {
            cell: cell.uniq(),
            size: payload.len(),
            max: page.content_size(),
        });
    }
    page.set_payload(&payload)?;
    Ok(page)
}

/// Decodes the node for `cell` from a checksum-verified page.
///
/// Checks that the page belongs to `cell` and to the expected build
/// generation before trusting its payload.
///
/// # Errors
///
/// Returns [`Error::CorruptPage`] on a kind, identity or generation mismatch
/// and on payloads that fail to decode or name children of another cell.
pub fn decode_node(cell: CellId, page: &Page, generation: u64) -> Result<Node> {
    let corrupt = |reason: String| Error::CorruptPage { page_id: page.id, reason };

    let header = page.header().map_err(|e| corrupt(e.to_string()))?;
    if header.cell != cell.uniq() || header.depth != cell.depth() {
        let owner = CellId::from_uniq(header.cell)
            .map_or_else(|| format!("invalid cell {}", header.cell), |c| c.to_string());
        return Err(corrupt(format!("page belongs to {owner}, expected {cell}")));
    }
    if header.generation != generation {
        return Err(corrupt(format!(
            "page written by generation {}, expected {generation}",
            header.generation
        )));
    }

    let payload = page.payload()?;
    match header.page_type {
        PageType::Leaf => {
            let stars: Vec<StarRecord> =
                codec::decode(payload).map_err(|e| corrupt(e.to_string()))?;
            Ok(Node::Leaf { stars })
        },
        PageType::Internal => {
            let wire: [WireChild; 4] =
                codec::decode(payload).map_err(|e| corrupt(e.to_string()))?;
            let expected = cell
                .children()
                .ok_or_else(|| corrupt(format!("internal node at deepest level for {cell}")))?;
            let mut children = [ChildRef { cell, page: 0 }; 4];
            for ((slot, w), want) in children.iter_mut().zip(wire).zip(expected) {
                if w.uniq != want.uniq() {
                    return Err(corrupt(format!("child {} is not child {want} of {cell}", w.uniq)));
                }
                *slot = ChildRef { cell: want, page: w.page };
            }
            Ok(Node::Internal { children })
        },
        PageType::Free => Err(corrupt("free page where a node was expected".to_string())),
    }
}
