//! Minimal Newick reader.
//!
//! Supports the standard Newick grammar:
//! ```text
//! tree     = subtree ';'
//! subtree  = '(' children ')' label | label
//! children = subtree (',' subtree)*
//! label    = name? (':' length)?
//! ```
//!
//! Missing branch lengths read as zero. Unnamed nodes are labelled `#<id>`
//! so every branch has a key.

use crate::tree::{Node, NodeId, PhyloTree};
use sylva_core::{Result, SylvaError};

/// Parse a Newick format string into a `PhyloTree`.
pub fn parse(input: &str) -> Result<PhyloTree> {
    let mut parser = Parser::new(input.as_bytes());
    let (mut nodes, root) = parser.parse_tree()?;
    for node in nodes.iter_mut().filter(|n| n.name.is_empty()) {
        node.name = format!("#{}", node.id);
    }
    PhyloTree::from_nodes(nodes, root)
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
    nodes: Vec<Node>,
}

impl<'a> Parser<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            pos: 0,
            nodes: Vec::new(),
        }
    }

    fn parse_tree(&mut self) -> Result<(Vec<Node>, NodeId)> {
        self.skip_whitespace();
        let root = self.parse_subtree(None)?;
        self.skip_whitespace();
        if self.peek() != Some(b';') {
            return Err(self.error("expected ';' at end of tree"));
        }
        self.pos += 1;
        self.skip_whitespace();
        if self.pos < self.input.len() {
            return Err(self.error("trailing characters after ';'"));
        }
        // The root has no branch above it.
        self.nodes[root].branch_length = 0.0;
        Ok((std::mem::take(&mut self.nodes), root))
    }

    fn parse_subtree(&mut self, parent: Option<NodeId>) -> Result<NodeId> {
        self.skip_whitespace();
        let id = self.nodes.len();
        let mut node = Node::new(id, String::new(), 0.0);
        node.parent = parent;
        self.nodes.push(node);

        if self.peek() == Some(b'(') {
            self.pos += 1;
            loop {
                let child = self.parse_subtree(Some(id))?;
                self.nodes[id].children.push(child);
                self.skip_whitespace();
                match self.peek() {
                    Some(b',') => self.pos += 1,
                    Some(b')') => {
                        self.pos += 1;
                        break;
                    }
                    _ => return Err(self.error("expected ',' or ')'")),
                }
            }
        }

        self.parse_label(id)?;
        Ok(id)
    }

    fn parse_label(&mut self, id: NodeId) -> Result<()> {
        self.skip_whitespace();
        let name = self.take_while(|b| {
            !matches!(b, b':' | b',' | b')' | b'(' | b';' | b' ' | b'\t' | b'\n' | b'\r')
        });
        self.nodes[id].name = name;

        self.skip_whitespace();
        if self.peek() == Some(b':') {
            self.pos += 1;
            self.skip_whitespace();
            let len_str =
                self.take_while(|b| matches!(b, b'0'..=b'9' | b'.' | b'-' | b'+' | b'e' | b'E'));
            if len_str.is_empty() {
                return Err(self.error("expected number after ':'"));
            }
            let len: f64 = len_str.parse().map_err(|_| {
                SylvaError::Parse(format!("invalid branch length: '{}'", len_str))
            })?;
            self.nodes[id].branch_length = len;
        }
        Ok(())
    }

    fn take_while(&mut self, keep: impl Fn(u8) -> bool) -> String {
        let start = self.pos;
        while self.pos < self.input.len() && keep(self.input[self.pos]) {
            self.pos += 1;
        }
        String::from_utf8_lossy(&self.input[start..self.pos]).into_owned()
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn error(&self, msg: &str) -> SylvaError {
        SylvaError::Parse(format!("{} at byte {}", msg, self.pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_primate_tree() {
        let newick =
            "(((Human:0.1,Chimpanzee:0.12)A:0.05,Gorilla:0.2)B:0.1,Orangutan:0.3,Gibbon:0.4)C;";
        let tree = parse(newick).unwrap();
        assert_eq!(tree.node_count(), 8);
        assert_eq!(
            tree.leaf_names(),
            vec!["Human", "Chimpanzee", "Gorilla", "Orangutan", "Gibbon"]
        );
        assert_eq!(tree.name(tree.root()), "C");
        assert_eq!(tree.children(tree.root()).len(), 3);
        let gibbon = tree.node_id("Gibbon").unwrap();
        assert!((tree.branch_length(gibbon) - 0.4).abs() < 1e-12);
    }

    #[test]
    fn unnamed_nodes_get_labels() {
        let tree = parse("((A:1,B:1):0.5,C:2);").unwrap();
        assert_eq!(tree.name(tree.root()), "#0");
        assert_eq!(tree.name(1), "#1");
        assert!(tree.node_id("#1").is_ok());
    }

    #[test]
    fn missing_lengths_are_zero() {
        let tree = parse("(A,B)R;").unwrap();
        let a = tree.node_id("A").unwrap();
        assert_eq!(tree.branch_length(a), 0.0);
    }

    #[test]
    fn root_length_is_dropped() {
        let tree = parse("(A:0.1,B:0.2)R:0.7;").unwrap();
        assert_eq!(tree.branch_length(tree.root()), 0.0);
    }

    #[test]
    fn parse_whitespace() {
        let tree = parse("  ( A : 0.1 , B : 0.2 ) R ; ").unwrap();
        assert_eq!(tree.node_count(), 3);
        assert_eq!(tree.leaf_count(), 2);
    }

    #[test]
    fn parse_errors() {
        assert!(matches!(parse("((A,B);"), Err(SylvaError::Parse(_))));
        assert!(matches!(parse("(A,B)"), Err(SylvaError::Parse(_))));
        assert!(matches!(parse("(A:abc,B);"), Err(SylvaError::Parse(_))));
        assert!(matches!(parse("(A,B);junk"), Err(SylvaError::Parse(_))));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn leaf_name() -> impl Strategy<Value = String> {
        "[A-Za-z][A-Za-z0-9]{0,5}"
    }

    /// Caterpillar trees with distinct leaf names.
    fn caterpillar() -> impl Strategy<Value = (Vec<String>, String)> {
        proptest::collection::btree_set(leaf_name(), 2..=6).prop_map(|set| {
            let leaves: Vec<String> = set.into_iter().collect();
            let mut s = format!("({}:0.1,{}:0.2)", leaves[0], leaves[1]);
            for leaf in &leaves[2..] {
                s = format!("({}:0.3,{}:0.4)", s, leaf);
            }
            s.push(';');
            (leaves, s)
        })
    }

    proptest! {
        #[test]
        fn leaf_names_survive_parsing((leaves, newick) in caterpillar()) {
            let tree = parse(&newick).unwrap();
            let parsed: Vec<String> = tree.leaf_names().iter().map(|s| s.to_string()).collect();
            prop_assert_eq!(parsed, leaves);
            prop_assert_eq!(tree.post_order().len(), tree.node_count());
        }

        #[test]
        fn parse_does_not_panic(s in "\\PC{0,100}") {
            let _ = parse(&s);
        }
    }
}
