//! Size and complexity limits applied to graph sources before rendering.
//!
//! The complexity figures come from a lexical pass over the DOT text. Nothing is
//! evaluated: comments and quoted or HTML strings are skipped, attribute lists are
//! ignored, and the remaining identifiers in node position are counted along with
//! edge operators. The result is an estimate that is good enough to refuse graphs
//! that would keep the layout engine busy for minutes.

use std::collections::HashSet;

use super::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderBudget {
    pub max_source_bytes: usize,
    pub max_nodes: usize,
    pub max_edges: usize,
}

impl RenderBudget {
    /// Combine two budgets, keeping the stricter limit of each pair.
    pub fn tighten(self, other: RenderBudget) -> RenderBudget {
        RenderBudget {
            max_source_bytes: self.max_source_bytes.min(other.max_source_bytes),
            max_nodes: self.max_nodes.min(other.max_nodes),
            max_edges: self.max_edges.min(other.max_edges),
        }
    }

    pub fn check(&self, source: &str) -> Result<GraphStats, ValidationError> {
        if source.len() > self.max_source_bytes {
            return Err(ValidationError::SourceTooLarge {
                actual: source.len(),
                limit: self.max_source_bytes,
            });
        }
        if source.trim().is_empty() {
            return Err(ValidationError::EmptySource);
        }
        if source.contains('\0') {
            return Err(ValidationError::NulByte);
        }

        let stats = GraphStats::scan(source);
        if stats.nodes > self.max_nodes {
            return Err(ValidationError::TooManyNodes {
                actual: stats.nodes,
                limit: self.max_nodes,
            });
        }
        if stats.edges > self.max_edges {
            return Err(ValidationError::TooManyEdges {
                actual: stats.edges,
                limit: self.max_edges,
            });
        }
        Ok(stats)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
}

impl GraphStats {
    pub fn scan(source: &str) -> GraphStats {
        let tokens = tokenize(source);
        let mut nodes: HashSet<&str> = HashSet::new();
        let mut edges = 0usize;
        let mut attr_depth = 0usize;
        let mut index = 0usize;

        while index < tokens.len() {
            match tokens[index] {
                Token::Open('[') => attr_depth += 1,
                Token::Close(']') => attr_depth = attr_depth.saturating_sub(1),
                _ if attr_depth > 0 => {}
                Token::Edge => edges += 1,
                Token::Id(text) if is_keyword(text) => {
                    // `graph name {`, `digraph name {`, `subgraph name {`
                    let names_graph = !text.eq_ignore_ascii_case("node")
                        && !text.eq_ignore_ascii_case("edge")
                        && !text.eq_ignore_ascii_case("strict");
                    if names_graph && matches!(tokens.get(index + 1), Some(Token::Id(_))) {
                        index += 1;
                    }
                }
                Token::Id(text) => {
                    let follows_port = index > 0 && matches!(tokens[index - 1], Token::Colon);
                    if matches!(tokens.get(index + 1), Some(Token::Equals)) {
                        // `key = value` at statement level; skip the value too.
                        index += 3;
                        continue;
                    }
                    if !follows_port {
                        nodes.insert(text);
                    }
                }
                _ => {}
            }
            index += 1;
        }

        GraphStats {
            nodes: nodes.len(),
            edges,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Id(&'a str),
    Edge,
    Equals,
    Colon,
    Open(char),
    Close(char),
    Other,
}

fn is_keyword(text: &str) -> bool {
    ["strict", "graph", "digraph", "subgraph", "node", "edge"]
        .iter()
        .any(|keyword| text.eq_ignore_ascii_case(keyword))
}

fn tokenize(source: &str) -> Vec<Token<'_>> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0usize;
    let mut line_start = true;

    while pos < bytes.len() {
        let byte = bytes[pos];
        match byte {
            b'\n' => {
                line_start = true;
                pos += 1;
                continue;
            }
            b if b.is_ascii_whitespace() => {
                pos += 1;
                continue;
            }
            // Preprocessor-style lines are ignored by Graphviz.
            b'#' if line_start => pos = skip_line(bytes, pos),
            b'/' if bytes.get(pos + 1) == Some(&b'/') => pos = skip_line(bytes, pos),
            b'/' if bytes.get(pos + 1) == Some(&b'*') => {
                pos = find(bytes, pos + 2, b"*/").map_or(bytes.len(), |end| end + 2);
            }
            b'"' => {
                let (end, text) = quoted(source, pos);
                tokens.push(Token::Id(text));
                pos = end;
            }
            b'<' => {
                pos = skip_html(bytes, pos);
                tokens.push(Token::Other);
            }
            b'-' if matches!(bytes.get(pos + 1), Some(b'>') | Some(b'-')) => {
                tokens.push(Token::Edge);
                pos += 2;
            }
            b'=' => {
                tokens.push(Token::Equals);
                pos += 1;
            }
            b':' => {
                tokens.push(Token::Colon);
                pos += 1;
            }
            b'{' | b'[' => {
                tokens.push(Token::Open(byte as char));
                pos += 1;
            }
            b'}' | b']' => {
                tokens.push(Token::Close(byte as char));
                pos += 1;
            }
            b if is_id_byte(b) || b == b'.' || (b == b'-' && starts_numeral(bytes, pos + 1)) => {
                let start = pos;
                pos += 1;
                while pos < bytes.len() && (is_id_byte(bytes[pos]) || bytes[pos] == b'.') {
                    pos += 1;
                }
                tokens.push(Token::Id(&source[start..pos]));
            }
            _ => {
                tokens.push(Token::Other);
                pos += 1;
            }
        }
        line_start = false;
    }

    tokens
}

fn is_id_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_' || byte >= 0x80
}

fn starts_numeral(bytes: &[u8], pos: usize) -> bool {
    matches!(bytes.get(pos), Some(b) if b.is_ascii_digit() || *b == b'.')
}

fn skip_line(bytes: &[u8], pos: usize) -> usize {
    bytes[pos..]
        .iter()
        .position(|&b| b == b'\n')
        .map_or(bytes.len(), |offset| pos + offset)
}

fn find(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    bytes
        .get(from..)?
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|offset| from + offset)
}

/// Returns the position after the closing quote and the unescaped-slice content.
fn quoted(source: &str, start: usize) -> (usize, &str) {
    let bytes = source.as_bytes();
    let mut pos = start + 1;
    while pos < bytes.len() {
        match bytes[pos] {
            b'\\' => pos += 2,
            b'"' => return (pos + 1, &source[start + 1..pos]),
            _ => pos += 1,
        }
    }
    (bytes.len(), &source[(start + 1).min(bytes.len())..])
}

fn skip_html(bytes: &[u8], start: usize) -> usize {
    let mut depth = 0usize;
    for (offset, &byte) in bytes[start..].iter().enumerate() {
        match byte {
            b'<' => depth += 1,
            b'>' => {
                depth -= 1;
                if depth == 0 {
                    return start + offset + 1;
                }
            }
            _ => {}
        }
    }
    bytes.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget() -> RenderBudget {
        RenderBudget {
            max_source_bytes: 1024,
            max_nodes: 3,
            max_edges: 2,
        }
    }

    #[test]
    fn counts_nodes_and_edges_of_a_small_digraph() {
        let stats = GraphStats::scan("digraph G { a -> b; b -> c; }");
        assert_eq!(stats, GraphStats { nodes: 3, edges: 2 });
    }

    #[test]
    fn ignores_attributes_comments_and_strings() {
        let source = r#"
# line directive
digraph "name" {
  rankdir=LR; // comment a -> b
  node [shape=box, label="x -> y"];
  /* block -> comment */
  "first node" -> second [label=<<b>a -> b</b>>];
  second:port:n -> "first node";
}
"#;
        let stats = GraphStats::scan(source);
        assert_eq!(stats, GraphStats { nodes: 2, edges: 2 });
    }

    #[test]
    fn undirected_edges_and_numerals_are_counted() {
        let stats = GraphStats::scan("graph { 1 -- 2 -- -3.5 }");
        assert_eq!(stats, GraphStats { nodes: 3, edges: 2 });
    }

    #[test]
    fn unterminated_constructs_do_not_panic() {
        for source in ["digraph { \"open", "digraph { <b", "/* never closed", "a -", "\\"] {
            let _ = GraphStats::scan(source);
        }
    }

    #[test]
    fn check_rejects_oversized_source_before_scanning() {
        let tight = RenderBudget {
            max_source_bytes: 8,
            ..budget()
        };
        assert_eq!(
            tight.check("digraph { a -> b }"),
            Err(ValidationError::SourceTooLarge {
                actual: 18,
                limit: 8
            })
        );
    }

    #[test]
    fn check_rejects_blank_and_nul_sources() {
        assert_eq!(budget().check("  \n\t"), Err(ValidationError::EmptySource));
        assert_eq!(budget().check("a\0b"), Err(ValidationError::NulByte));
    }

    #[test]
    fn check_enforces_node_and_edge_limits() {
        assert!(matches!(
            budget().check("digraph { a; b; c; d }"),
            Err(ValidationError::TooManyNodes {
                actual: 4,
                limit: 3
            })
        ));
        assert!(matches!(
            budget().check("digraph { a -> b -> c -> a }"),
            Err(ValidationError::TooManyEdges {
                actual: 3,
                limit: 2
            })
        ));
        assert!(budget().check("digraph { a -> b }").is_ok());
    }

    #[test]
    fn tighten_keeps_the_smaller_limits() {
        let other = RenderBudget {
            max_source_bytes: 10_000,
            max_nodes: 1,
            max_edges: 50,
        };
        assert_eq!(
            budget().tighten(other),
            RenderBudget {
                max_source_bytes: 1024,
                max_nodes: 1,
                max_edges: 2,
            }
        );
    }
}
