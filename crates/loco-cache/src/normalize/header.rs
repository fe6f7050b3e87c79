//! Tolerant header resolution

use std::collections::HashMap;

/// A column the normalizer looks for, with accepted alternative spellings.
#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
}

impl ColumnSpec {
    pub const fn new(name: &'static str) -> Self {
        Self { name, aliases: &[] }
    }

    pub const fn with_aliases(name: &'static str, aliases: &'static [&'static str]) -> Self {
        Self { name, aliases }
    }
}

/// Comparison form of a header: lowercase with all whitespace removed, so
/// `"ICMS/ Message "` and `"icms/message"` are the same column.
pub fn header_token(header: &str) -> String {
    header
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Header row of a sheet, indexed by header token.
#[derive(Debug, Clone)]
pub struct HeaderMap {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl HeaderMap {
    pub fn new(header_row: &[String]) -> Self {
        let names: Vec<String> = header_row.iter().map(|h| h.trim().to_string()).collect();

        let mut index = HashMap::new();
        for (i, name) in names.iter().enumerate() {
            // Leftmost column wins when a header repeats.
            index.entry(header_token(name)).or_insert(i);
        }

        Self { names, index }
    }

    /// Position of `column`, trying its name first and then each alias.
    pub fn resolve(&self, column: &ColumnSpec) -> Option<usize> {
        std::iter::once(column.name)
            .chain(column.aliases.iter().copied())
            .find_map(|name| self.index.get(&header_token(name)).copied())
    }

    /// Trimmed header text of every column, in sheet order.
    pub fn names(&self) -> &[String] {
        &self.names
    }
}
