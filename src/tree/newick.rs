//! Newick Parser
//!
//! Iterative (stack-based) parser so that deep, caterpillar-shaped trees with
//! tens of thousands of tips do not overflow the call stack.
//!
//! Supported subset:
//! - nested clades `((A:0.1,B:0.2):0.3,C:0.4);`
//! - quoted labels `'Genus species'` (with `''` as an escaped quote)
//! - internal node labels / support values (kept as labels, ignored for tips)
//! - bracketed comments `[&R]` anywhere whitespace is allowed
//!
//! Missing branch lengths are read as 0.0. Negative lengths are rejected.

use crate::error::{PhyloError, PhyloResult};
use crate::tree::TreeNode;

pub(crate) fn parse(text: &str) -> PhyloResult<(Vec<TreeNode>, usize)> {
    Parser::new(text).run()
}

struct Parser<'a> {
    bytes: &'a [u8],
    text: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            bytes: text.as_bytes(),
            text,
            pos: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> PhyloError {
        PhyloError::Newick {
            position: self.pos,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_whitespace_and_comments(&mut self) -> PhyloResult<()> {
        while let Some(b) = self.peek() {
            if b.is_ascii_whitespace() {
                self.pos += 1;
            } else if b == b'[' {
                let start = self.pos;
                while let Some(c) = self.peek() {
                    self.pos += 1;
                    if c == b']' {
                        break;
                    }
                }
                if self.bytes[self.pos - 1] != b']' {
                    self.pos = start;
                    return Err(self.error("unterminated comment"));
                }
            } else {
                break;
            }
        }
        Ok(())
    }

    fn run(mut self) -> PhyloResult<(Vec<TreeNode>, usize)> {
        let mut nodes: Vec<TreeNode> = Vec::new();
        let mut open: Vec<usize> = Vec::new();
        // True right after '(' or ',' : a child node must follow
        let mut expect_node = true;
        let mut finished = false;

        self.skip_whitespace_and_comments()?;
        if self.peek().is_none() {
            return Err(self.error("empty input"));
        }

        while !finished {
            self.skip_whitespace_and_comments()?;
            let Some(b) = self.peek() else {
                if !open.is_empty() {
                    return Err(self.error("unbalanced parentheses: missing ')'"));
                }
                // Trailing ';' is optional
                break;
            };

            match b {
                b'(' => {
                    if !expect_node {
                        return Err(self.error("unexpected '('"));
                    }
                    let idx = nodes.len();
                    nodes.push(TreeNode::new(open.last().copied()));
                    if let Some(&parent) = open.last() {
                        nodes[parent].children.push(idx);
                    }
                    open.push(idx);
                    self.pos += 1;
                    expect_node = true;
                }
                b',' => {
                    if expect_node {
                        return Err(self.error("unlabelled tip before ','"));
                    }
                    if open.is_empty() {
                        return Err(self.error("',' outside of any clade"));
                    }
                    self.pos += 1;
                    expect_node = true;
                }
                b')' => {
                    if expect_node {
                        return Err(self.error("unlabelled tip before ')'"));
                    }
                    let closed = open
                        .pop()
                        .ok_or_else(|| self.error("unbalanced parentheses: unexpected ')'"))?;
                    self.pos += 1;
                    let (label, length) = self.label_and_length()?;
                    nodes[closed].label = label;
                    nodes[closed].branch_length = length;
                    expect_node = false;
                }
                b';' => {
                    if !open.is_empty() {
                        return Err(self.error("unbalanced parentheses: missing ')'"));
                    }
                    if expect_node {
                        return Err(self.error("unexpected ';'"));
                    }
                    self.pos += 1;
                    finished = true;
                }
                _ => {
                    if !expect_node {
                        return Err(self.error(format!("unexpected character '{}'", b as char)));
                    }
                    if open.is_empty() && !nodes.is_empty() {
                        return Err(self.error("multiple root nodes"));
                    }
                    let (label, length) = self.label_and_length()?;
                    if label.is_empty() {
                        return Err(self.error("unlabelled tip"));
                    }
                    let idx = nodes.len();
                    let mut node = TreeNode::new(open.last().copied());
                    node.label = label;
                    node.branch_length = length;
                    nodes.push(node);
                    if let Some(&parent) = open.last() {
                        nodes[parent].children.push(idx);
                    }
                    expect_node = false;
                }
            }
        }

        self.skip_whitespace_and_comments()?;
        if self.peek().is_some() {
            return Err(self.error("trailing content after ';'"));
        }
        if nodes.is_empty() {
            return Err(self.error("no nodes parsed"));
        }

        // Root edge length does not contribute to any tip-to-tip path
        nodes[0].branch_length = 0.0;
        Ok((nodes, 0))
    }

    /// Parse `label[:length]` following a tip start or a closing ')'
    fn label_and_length(&mut self) -> PhyloResult<(String, f64)> {
        self.skip_whitespace_and_comments()?;
        let label = if self.peek() == Some(b'\'') {
            self.quoted_label()?
        } else {
            self.unquoted_label()
        };

        self.skip_whitespace_and_comments()?;
        let mut length = 0.0;
        if self.peek() == Some(b':') {
            self.pos += 1;
            self.skip_whitespace_and_comments()?;
            let start = self.pos;
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() || matches!(c, b'.' | b'-' | b'+' | b'e' | b'E') {
                    self.pos += 1;
                } else {
                    break;
                }
            }
            let raw = &self.text[start..self.pos];
            length = raw
                .parse::<f64>()
                .map_err(|_| self.error(format!("invalid branch length '{}'", raw)))?;
            if !length.is_finite() {
                return Err(self.error(format!("non-finite branch length '{}'", raw)));
            }
            if length < 0.0 {
                return Err(PhyloError::NegativeBranchLength { label, length });
            }
        }
        Ok((label, length))
    }

    fn quoted_label(&mut self) -> PhyloResult<String> {
        let start = self.pos;
        self.pos += 1;
        let mut label = String::new();
        loop {
            let Some(rest) = self.text.get(self.pos..) else {
                break;
            };
            let Some(c) = rest.chars().next() else {
                break;
            };
            self.pos += c.len_utf8();
            if c == '\'' {
                if self.peek() == Some(b'\'') {
                    label.push('\'');
                    self.pos += 1;
                } else {
                    return Ok(label);
                }
            } else {
                label.push(c);
            }
        }
        self.pos = start;
        Err(self.error("unterminated quoted label"))
    }

    fn unquoted_label(&mut self) -> String {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, b'(' | b')' | b',' | b':' | b';' | b'[') {
                break;
            }
            self.pos += 1;
        }
        self.text[start..self.pos].trim().to_string()
    }
}
