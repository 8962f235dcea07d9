//! Node pages carry an 8-byte ASCII tag at offset 0 identifying the kind
//! of body that follows. Meta pages are not nodes and carry no tag.

pub const TAG_SIZE: usize = 8;

const TAG_LEAF: &[u8; TAG_SIZE] = b"LEAF    ";
const TAG_BRANCH: &[u8; TAG_SIZE] = b"BRANCH  ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Leaf,
    Branch,
}

impl NodeType {
    /// Reads the tag of a node page. An unknown tag means the page image
    /// is corrupt or the caller descended into a non-node page.
    pub fn of(page: &[u8]) -> NodeType {
        match &page[..TAG_SIZE] {
            tag if tag == TAG_LEAF => NodeType::Leaf,
            tag if tag == TAG_BRANCH => NodeType::Branch,
            tag => panic!("unknown node tag: {:?}", tag),
        }
    }

    pub fn write_tag(self, page: &mut [u8]) {
        let tag = match self {
            NodeType::Leaf => TAG_LEAF,
            NodeType::Branch => TAG_BRANCH,
        };
        page[..TAG_SIZE].copy_from_slice(tag);
    }
}
