//! Targeted edits of `CREATE TABLE` statements as stored in `sqlite_master`.
//!
//! A rebuilt table is created from its own stored definition with one clause
//! added or removed, so whatever the edit does not touch (CHECK constraints,
//! collations, generated columns, table options) is carried over verbatim.

use crate::errors::{MigrationError, MigrationResult};

type LexResult<T> = Result<T, &'static str>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    /// Bare keyword, identifier or number.
    Word,
    /// `"..."`, `` `...` `` or `[...]` identifier.
    Quoted,
    /// `'...'` string literal.
    Literal,
    /// Balanced `( ... )`, nested content included.
    Group,
    Symbol,
}

#[derive(Debug, Clone, Copy)]
struct Token {
    kind: TokenKind,
    start: usize,
    end: usize,
}

impl Token {
    fn text<'s>(&self, src: &'s str) -> &'s str {
        &src[self.start..self.end]
    }

    fn is_keyword(&self, src: &str, keyword: &str) -> bool {
        self.kind == TokenKind::Word && self.text(src).eq_ignore_ascii_case(keyword)
    }

    /// Identifier value with any quoting removed.
    fn identifier(&self, src: &str) -> Option<String> {
        let text = self.text(src);
        match self.kind {
            TokenKind::Word => Some(text.to_string()),
            TokenKind::Quoted => {
                let inner = &text[1..text.len() - 1];
                Some(match text.as_bytes()[0] {
                    b'"' => inner.replace("\"\"", "\""),
                    b'`' => inner.replace("``", "`"),
                    _ => inner.to_string(),
                })
            }
            // SQLite takes a string literal where it expects a name.
            TokenKind::Literal => Some(text[1..text.len() - 1].replace("''", "'")),
            TokenKind::Group | TokenKind::Symbol => None,
        }
    }
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

/// Index of the first byte at or after `i` that is not whitespace or comment.
fn skip_trivia(src: &str, mut i: usize) -> usize {
    let bytes = src.as_bytes();
    loop {
        match bytes.get(i) {
            Some(b) if b.is_ascii_whitespace() => i += 1,
            Some(b'-') if bytes.get(i + 1) == Some(&b'-') => {
                i = src[i..].find('\n').map_or(bytes.len(), |n| i + n + 1);
            }
            Some(b'/') if bytes.get(i + 1) == Some(&b'*') => {
                i = src[i + 2..].find("*/").map_or(bytes.len(), |n| i + 2 + n + 2);
            }
            _ => return i,
        }
    }
}

fn quoted_end(src: &str, start: usize, close: u8) -> LexResult<usize> {
    let bytes = src.as_bytes();
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == close {
            if close != b']' && bytes.get(i + 1) == Some(&close) {
                i += 2;
                continue;
            }
            return Ok(i + 1);
        }
        i += 1;
    }
    Err("unterminated quoted token")
}

fn group_end(src: &str, open: usize) -> LexResult<usize> {
    let mut i = open + 1;
    loop {
        i = skip_trivia(src, i);
        match src.as_bytes().get(i) {
            None => return Err("unbalanced parenthesis"),
            Some(b')') => return Ok(i + 1),
            Some(_) => i = lex_at(src, i)?.end,
        }
    }
}

fn lex_at(src: &str, start: usize) -> LexResult<Token> {
    let bytes = src.as_bytes();
    let (kind, end) = match bytes[start] {
        b'\'' => (TokenKind::Literal, quoted_end(src, start, b'\'')?),
        b'"' => (TokenKind::Quoted, quoted_end(src, start, b'"')?),
        b'`' => (TokenKind::Quoted, quoted_end(src, start, b'`')?),
        b'[' => (TokenKind::Quoted, quoted_end(src, start, b']')?),
        b'(' => (TokenKind::Group, group_end(src, start)?),
        b')' => return Err("unbalanced parenthesis"),
        b if is_word_byte(b) => {
            let len = bytes[start..].iter().take_while(|b| is_word_byte(**b)).count();
            (TokenKind::Word, start + len)
        }
        _ => (TokenKind::Symbol, start + 1),
    };
    Ok(Token { kind, start, end })
}

fn tokenize(src: &str) -> LexResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut i = skip_trivia(src, 0);
    while i < src.len() {
        let token = lex_at(src, i)?;
        i = skip_trivia(src, token.end);
        tokens.push(token);
    }
    Ok(tokens)
}

fn split_commas<'t>(src: &str, tokens: &'t [Token]) -> Vec<&'t [Token]> {
    tokens
        .split(|t| t.kind == TokenKind::Symbol && t.text(src) == ",")
        .collect()
}

fn unsupported(table: &str, reason: &str) -> MigrationError {
    MigrationError::UnsupportedDefinition {
        table: table.to_string(),
        reason: reason.to_string(),
    }
}

/// One column definition or table constraint, as written.
#[derive(Debug, Clone)]
struct Entry {
    text: String,
    tokens: Vec<Token>,
}

impl Entry {
    fn new(text: String) -> LexResult<Self> {
        let tokens = tokenize(&text)?;
        if tokens.is_empty() {
            return Err("empty definition");
        }
        Ok(Self { text, tokens })
    }

    fn retokenize(&mut self) -> LexResult<()> {
        self.tokens = tokenize(&self.text)?;
        Ok(())
    }

    fn keyword_at(&self, index: usize, keyword: &str) -> bool {
        self.tokens
            .get(index)
            .is_some_and(|t| t.is_keyword(&self.text, keyword))
    }

    /// Column name, or `None` for a table constraint.
    fn column_name(&self) -> Option<String> {
        let first = self.tokens.first()?;
        let constraint = ["CONSTRAINT", "PRIMARY", "UNIQUE", "CHECK", "FOREIGN"]
            .iter()
            .any(|keyword| first.is_keyword(&self.text, keyword));
        if constraint { None } else { first.identifier(&self.text) }
    }

    fn declares_not_null(&self) -> bool {
        (1..self.tokens.len()).any(|k| self.keyword_at(k - 1, "NOT") && self.keyword_at(k, "NULL"))
    }

    fn is_autoincrement(&self) -> bool {
        let Some(key) = (1..self.tokens.len()).find(|&k| self.keyword_at(k - 1, "PRIMARY") && self.keyword_at(k, "KEY"))
        else {
            return false;
        };
        (key + 1..self.tokens.len()).any(|k| self.keyword_at(k, "AUTOINCREMENT"))
    }

    /// Index one past a foreign key clause whose body starts at token `k`,
    /// right after the parent table name.
    fn reference_clause_end(&self, mut k: usize) -> usize {
        if self.tokens.get(k).is_some_and(|t| t.kind == TokenKind::Group) {
            k += 1;
        }
        loop {
            if self.keyword_at(k, "ON") {
                // ON DELETE|UPDATE <action>, where SET NULL, SET DEFAULT and NO ACTION take two words
                k += if self.keyword_at(k + 2, "SET") || self.keyword_at(k + 2, "NO") { 4 } else { 3 };
            } else if self.keyword_at(k, "MATCH") {
                k += 2;
            } else if self.keyword_at(k, "DEFERRABLE") || (self.keyword_at(k, "NOT") && self.keyword_at(k + 1, "DEFERRABLE")) {
                k += if self.keyword_at(k, "NOT") { 2 } else { 1 };
                if self.keyword_at(k, "INITIALLY") {
                    k += 2;
                }
            } else {
                break;
            }
        }
        k.min(self.tokens.len())
    }

    /// Byte span of a column's `[CONSTRAINT name] REFERENCES parent ...` clause.
    fn column_reference_span(&self, parent: &str) -> Option<(usize, usize)> {
        for (k, token) in self.tokens.iter().enumerate() {
            if !token.is_keyword(&self.text, "REFERENCES") {
                continue;
            }
            let target = self.tokens.get(k + 1).and_then(|t| t.identifier(&self.text));
            if !target.is_some_and(|t| t.eq_ignore_ascii_case(parent)) {
                continue;
            }
            let start = if k >= 2 && self.keyword_at(k - 2, "CONSTRAINT") {
                self.tokens[k - 2].start
            } else {
                token.start
            };
            let end = self.tokens[self.reference_clause_end(k + 2) - 1].end;
            return Some((start, end));
        }
        None
    }

    /// Referencing columns and parent of a table-level `FOREIGN KEY` constraint.
    fn table_foreign_key(&self) -> Option<(Vec<String>, String)> {
        let f = if self.keyword_at(0, "CONSTRAINT") { 2 } else { 0 };
        if !self.keyword_at(f, "FOREIGN") || !self.keyword_at(f + 1, "KEY") || !self.keyword_at(f + 3, "REFERENCES") {
            return None;
        }
        let group = self.tokens.get(f + 2).filter(|t| t.kind == TokenKind::Group)?;
        let inner = &self.text[group.start + 1..group.end - 1];
        let tokens = tokenize(inner).ok()?;
        let columns = split_commas(inner, &tokens)
            .into_iter()
            .map(|part| part.first().and_then(|t| t.identifier(inner)))
            .collect::<Option<Vec<_>>>()?;
        let parent = self.tokens.get(f + 4)?.identifier(&self.text)?;
        Some((columns, parent))
    }
}

/// A `CREATE TABLE` statement split into its column and constraint definitions.
#[derive(Debug, Clone)]
pub struct TableDefinition {
    table: String,
    entries: Vec<Entry>,
    /// Table options after the closing parenthesis, e.g. `WITHOUT ROWID`.
    options: String,
}

impl TableDefinition {
    pub fn parse(table: &str, sql: &str) -> MigrationResult<Self> {
        let tokens = tokenize(sql).map_err(|reason| unsupported(table, reason))?;
        let body_index = tokens
            .iter()
            .position(|t| t.kind == TokenKind::Group)
            .ok_or_else(|| unsupported(table, "no column list"))?;

        let header = &tokens[..body_index];
        let plain = header.first().is_some_and(|t| t.is_keyword(sql, "CREATE"))
            && header.iter().any(|t| t.is_keyword(sql, "TABLE"))
            && !header.iter().any(|t| t.is_keyword(sql, "VIRTUAL"));
        if !plain {
            return Err(unsupported(table, "not a plain CREATE TABLE statement"));
        }

        let rest = &tokens[body_index + 1..];
        let options = match (rest.first(), rest.last()) {
            (Some(first), Some(last)) => sql[first.start..last.end].to_string(),
            _ => String::new(),
        };

        let body = tokens[body_index];
        let inner = &sql[body.start + 1..body.end - 1];
        let inner_tokens = tokenize(inner).map_err(|reason| unsupported(table, reason))?;
        let mut entries = Vec::new();
        for part in split_commas(inner, &inner_tokens) {
            let (Some(first), Some(last)) = (part.first(), part.last()) else {
                return Err(unsupported(table, "empty definition"));
            };
            let entry = Entry::new(inner[first.start..last.end].to_string())
                .map_err(|reason| unsupported(table, reason))?;
            entries.push(entry);
        }

        Ok(Self {
            table: table.to_string(),
            entries,
            options,
        })
    }

    /// Whether the integer primary key is declared `AUTOINCREMENT`.
    pub fn is_autoincrement(&self) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.column_name().is_some() && entry.is_autoincrement())
    }

    /// Remove the foreign key from `columns` to `parent`. Returns whether one was found.
    pub fn drop_foreign_key(&mut self, columns: &[String], parent: &str) -> MigrationResult<bool> {
        for index in 0..self.entries.len() {
            let entry = &self.entries[index];
            match entry.column_name() {
                Some(name) => {
                    if columns.len() != 1 || !name.eq_ignore_ascii_case(&columns[0]) {
                        continue;
                    }
                    if let Some((start, end)) = entry.column_reference_span(parent) {
                        let entry = &mut self.entries[index];
                        entry.text.replace_range(start..end, "");
                        entry.retokenize().map_err(|reason| unsupported(&self.table, reason))?;
                        return Ok(true);
                    }
                }
                None => {
                    let Some((from, to)) = entry.table_foreign_key() else {
                        continue;
                    };
                    let same_columns = from.len() == columns.len()
                        && from.iter().zip(columns).all(|(a, b)| a.eq_ignore_ascii_case(b));
                    if same_columns && to.eq_ignore_ascii_case(parent) {
                        self.entries.remove(index);
                        return Ok(true);
                    }
                }
            }
        }
        Ok(false)
    }

    /// Declare `column` NOT NULL. Returns false when no such column is defined.
    pub fn set_not_null(&mut self, column: &str) -> MigrationResult<bool> {
        let Self { table, entries, .. } = self;
        let Some(entry) = entries
            .iter_mut()
            .find(|e| e.column_name().is_some_and(|name| name.eq_ignore_ascii_case(column)))
        else {
            return Ok(false);
        };
        if !entry.declares_not_null() {
            let end = entry.tokens.last().map_or(entry.text.len(), |t| t.end);
            entry.text.insert_str(end, " NOT NULL");
            entry.retokenize().map_err(|reason| unsupported(table, reason))?;
        }
        Ok(true)
    }

    /// Render the statement for a table called `name`, given already quoted.
    pub fn render(&self, name: &str) -> String {
        let body = self
            .entries
            .iter()
            .map(|e| e.text.as_str())
            .collect::<Vec<_>>()
            .join(",\n    ");
        if self.options.is_empty() {
            format!("CREATE TABLE {name} (\n    {body}\n)")
        } else {
            format!("CREATE TABLE {name} (\n    {body}\n) {}", self.options)
        }
    }
}
