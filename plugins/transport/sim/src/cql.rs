//! The slice of CQL the simulated cluster understands: keyspace and table
//! DDL, single-row INSERT, and SELECT by key.

use tessera_api::LogicalType;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Quoted(String),
    Str(String),
    Num(String),
    Hex(String),
    Sym(char),
}

const SYMBOLS: &str = "(),.;*=<>?{}:";

fn lex(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let take_while = |mut j: usize, f: &dyn Fn(char) -> bool| {
        while j < chars.len() && f(chars[j]) {
            j += 1;
        }
        j
    };

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '0' && matches!(chars.get(i + 1), Some('x' | 'X')) {
            let end = take_while(i + 2, &|c| c.is_ascii_hexdigit());
            tokens.push(Token::Hex(chars[i + 2..end].iter().collect()));
            i = end;
        } else if c.is_ascii_alphabetic() || c == '_' {
            let end = take_while(i, &|c| c.is_ascii_alphanumeric() || c == '_');
            tokens.push(Token::Word(chars[i..end].iter().collect()));
            i = end;
        } else if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) {
            let mut end = take_while(i + 1, &|c| c.is_ascii_digit() || c == '.');
            if matches!(chars.get(end), Some('e' | 'E')) {
                let sign = usize::from(matches!(chars.get(end + 1), Some('+' | '-')));
                end = take_while(end + 1 + sign, &|c| c.is_ascii_digit());
            }
            tokens.push(Token::Num(chars[i..end].iter().collect()));
            i = end;
        } else if c == '\'' || c == '"' {
            let (text, end) = quoted(&chars, i)?;
            tokens.push(if c == '\'' { Token::Str(text) } else { Token::Quoted(text) });
            i = end;
        } else if SYMBOLS.contains(c) {
            tokens.push(Token::Sym(c));
            i += 1;
        } else {
            return Err(format!("line 1:{i} unexpected character '{c}'"));
        }
    }
    Ok(tokens)
}

/// Read a quoted run starting at `start`; a doubled quote escapes itself.
fn quoted(chars: &[char], start: usize) -> Result<(String, usize), String> {
    let quote = chars[start];
    let mut text = String::new();
    let mut i = start + 1;
    loop {
        match chars.get(i) {
            None => return Err(format!("line 1:{start} unterminated literal")),
            Some(&c) if c == quote => {
                if chars.get(i + 1) == Some(&quote) {
                    text.push(quote);
                    i += 2;
                } else {
                    return Ok((text, i + 1));
                }
            }
            Some(&c) => {
                text.push(c);
                i += 1;
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Statements
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    pub keyspace: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Number(String),
    Str(String),
    Hex(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Marker,
    Literal(Literal),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Term),
    In(String, Vec<Term>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    CreateKeyspace {
        name: String,
        if_not_exists: bool,
    },
    CreateTable {
        table: TableRef,
        if_not_exists: bool,
        columns: Vec<(String, LogicalType)>,
        key: String,
    },
    DropTable {
        table: TableRef,
        if_exists: bool,
    },
    Use(String),
    Insert {
        table: TableRef,
        columns: Vec<String>,
        values: Vec<Term>,
    },
    Select {
        table: TableRef,
        /// `None` selects every column.
        columns: Option<Vec<String>>,
        filter: Option<Filter>,
    },
}

impl Statement {
    /// Bind markers in order of appearance.
    pub fn markers(&self) -> usize {
        let count = |terms: &[Term]| terms.iter().filter(|t| **t == Term::Marker).count();
        match self {
            Statement::Insert { values, .. } => count(values),
            Statement::Select {
                filter: Some(Filter::Eq(_, term)),
                ..
            } => count(std::slice::from_ref(term)),
            Statement::Select {
                filter: Some(Filter::In(_, terms)),
                ..
            } => count(terms),
            _ => 0,
        }
    }
}

pub fn parse(query: &str) -> Result<Statement, String> {
    let mut parser = Parser {
        tokens: lex(query)?,
        pos: 0,
    };
    parser.statement()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn statement(&mut self) -> Result<Statement, String> {
        let statement = if self.eat_keyword("CREATE") {
            if self.eat_keyword("KEYSPACE") {
                let if_not_exists = self.if_clause(&["NOT", "EXISTS"])?;
                let name = self.ident()?;
                self.pos = self.tokens.len(); // replication options are ignored
                Statement::CreateKeyspace { name, if_not_exists }
            } else {
                self.keyword("TABLE")?;
                self.create_table()?
            }
        } else if self.eat_keyword("DROP") {
            self.keyword("TABLE")?;
            let if_exists = self.if_clause(&["EXISTS"])?;
            let table = self.table()?;
            Statement::DropTable { table, if_exists }
        } else if self.eat_keyword("USE") {
            Statement::Use(self.ident()?)
        } else if self.eat_keyword("INSERT") {
            self.insert()?
        } else if self.eat_keyword("SELECT") {
            self.select()?
        } else {
            return Err(self.unexpected());
        };

        self.eat_symbol(';');
        if self.pos < self.tokens.len() {
            return Err(self.unexpected());
        }
        Ok(statement)
    }

    fn create_table(&mut self) -> Result<Statement, String> {
        let if_not_exists = self.if_clause(&["NOT", "EXISTS"])?;
        let table = self.table()?;
        self.symbol('(')?;

        let mut columns = Vec::new();
        let mut key = None;
        loop {
            if self.eat_keyword("PRIMARY") {
                self.keyword("KEY")?;
                key = Some(self.primary_key()?);
            } else {
                let name = self.ident()?;
                let ty = self.ty()?;
                if self.eat_keyword("PRIMARY") {
                    self.keyword("KEY")?;
                    key = Some(name.clone());
                }
                columns.push((name, ty));
            }
            if !self.eat_symbol(',') {
                self.symbol(')')?;
                break;
            }
        }
        if self.eat_keyword("WITH") {
            self.pos = self.tokens.len();
        }

        let key = key.ok_or_else(|| "No PRIMARY KEY specifed (exactly one required)".to_string())?;
        Ok(Statement::CreateTable {
            table,
            if_not_exists,
            columns,
            key,
        })
    }

    /// `(k)`, `(k, c)` or `((k1, k2), c)`: the first key column is kept.
    fn primary_key(&mut self) -> Result<String, String> {
        self.symbol('(')?;
        let mut depth = 1;
        if self.eat_symbol('(') {
            depth += 1;
        }
        let key = self.ident()?;
        while depth > 0 {
            match self.next() {
                Some(Token::Sym('(')) => depth += 1,
                Some(Token::Sym(')')) => depth -= 1,
                Some(_) => {}
                None => return Err("unbalanced PRIMARY KEY clause".to_string()),
            }
        }
        Ok(key)
    }

    fn insert(&mut self) -> Result<Statement, String> {
        self.keyword("INTO")?;
        let table = self.table()?;

        self.symbol('(')?;
        let mut columns = vec![self.ident()?];
        while self.eat_symbol(',') {
            columns.push(self.ident()?);
        }
        self.symbol(')')?;

        self.keyword("VALUES")?;
        let values = self.terms()?;
        if values.len() != columns.len() {
            return Err("Unmatched column names/values".to_string());
        }
        Ok(Statement::Insert { table, columns, values })
    }

    fn select(&mut self) -> Result<Statement, String> {
        let columns = if self.eat_symbol('*') {
            None
        } else {
            let mut names = vec![self.ident()?];
            while self.eat_symbol(',') {
                names.push(self.ident()?);
            }
            Some(names)
        };
        self.keyword("FROM")?;
        let table = self.table()?;

        let filter = if self.eat_keyword("WHERE") {
            let column = self.ident()?;
            if self.eat_symbol('=') {
                Some(Filter::Eq(column, self.term()?))
            } else {
                self.keyword("IN")?;
                Some(Filter::In(column, self.terms()?))
            }
        } else {
            None
        };
        Ok(Statement::Select { table, columns, filter })
    }

    // ── pieces ───────────────────────────────────────────────────

    fn if_clause(&mut self, words: &[&str]) -> Result<bool, String> {
        if !self.eat_keyword("IF") {
            return Ok(false);
        }
        for word in words {
            self.keyword(word)?;
        }
        Ok(true)
    }

    fn table(&mut self) -> Result<TableRef, String> {
        let first = self.ident()?;
        if self.eat_symbol('.') {
            Ok(TableRef {
                keyspace: Some(first),
                name: self.ident()?,
            })
        } else {
            Ok(TableRef {
                keyspace: None,
                name: first,
            })
        }
    }

    fn ty(&mut self) -> Result<LogicalType, String> {
        let name = self.ident()?;
        let mut args = Vec::new();
        if self.eat_symbol('<') {
            args.push(self.ty()?);
            while self.eat_symbol(',') {
                args.push(self.ty()?);
            }
            self.symbol('>')?;
        }
        let arity = args.len();
        let mut args = args.into_iter();
        let ty = match (name.as_str(), arity) {
            ("frozen", 1) => args.next(),
            ("list", 1) => args.next().map(LogicalType::list),
            ("set", 1) => args.next().map(LogicalType::set),
            ("map", 2) => match (args.next(), args.next()) {
                (Some(k), Some(v)) => Some(LogicalType::map(k, v)),
                _ => None,
            },
            (scalar, 0) => scalar.parse().ok(),
            _ => None,
        };
        ty.ok_or_else(|| format!("Unknown type {name}"))
    }

    fn terms(&mut self) -> Result<Vec<Term>, String> {
        self.symbol('(')?;
        let mut terms = vec![self.term()?];
        while self.eat_symbol(',') {
            terms.push(self.term()?);
        }
        self.symbol(')')?;
        Ok(terms)
    }

    fn term(&mut self) -> Result<Term, String> {
        let literal = match self.next() {
            Some(Token::Sym('?')) => return Ok(Term::Marker),
            Some(Token::Word(w)) if w.eq_ignore_ascii_case("null") => Literal::Null,
            Some(Token::Word(w)) if w.eq_ignore_ascii_case("true") => Literal::Bool(true),
            Some(Token::Word(w)) if w.eq_ignore_ascii_case("false") => Literal::Bool(false),
            Some(Token::Num(n)) => Literal::Number(n),
            Some(Token::Str(s)) => Literal::Str(s),
            Some(Token::Hex(h)) => Literal::Hex(h),
            _ => {
                self.pos = self.pos.saturating_sub(1);
                return Err(self.unexpected());
            }
        };
        Ok(Term::Literal(literal))
    }

    /// Unquoted identifiers fold to lower case; quoted ones keep their case.
    fn ident(&mut self) -> Result<String, String> {
        match self.next() {
            Some(Token::Word(w)) => Ok(w.to_ascii_lowercase()),
            Some(Token::Quoted(q)) => Ok(q),
            _ => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.unexpected())
            }
        }
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        match self.tokens.get(self.pos) {
            Some(Token::Word(w)) if w.eq_ignore_ascii_case(keyword) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn keyword(&mut self, keyword: &str) -> Result<(), String> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn eat_symbol(&mut self, symbol: char) -> bool {
        if self.tokens.get(self.pos) == Some(&Token::Sym(symbol)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn symbol(&mut self, symbol: char) -> Result<(), String> {
        if self.eat_symbol(symbol) {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn unexpected(&self) -> String {
        match self.tokens.get(self.pos) {
            Some(token) => format!("line 1:{} no viable alternative at input {token:?}", self.pos),
            None => "line 1: mismatched input at end of statement".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_table_with_collections() {
        let statement = parse(
            "CREATE TABLE IF NOT EXISTS tester.all_types (
                id uuid PRIMARY KEY, tags set<text>, scores map<text, frozen<list<int>>>
            ) WITH comment = 'x';",
        )
        .unwrap();
        let Statement::CreateTable {
            table,
            if_not_exists,
            columns,
            key,
        } = statement
        else {
            panic!("not a create table");
        };
        assert!(if_not_exists);
        assert_eq!(table.keyspace.as_deref(), Some("tester"));
        assert_eq!(key, "id");
        assert_eq!(columns[1].1, LogicalType::set(LogicalType::Text));
        assert_eq!(
            columns[2].1,
            LogicalType::map(LogicalType::Text, LogicalType::list(LogicalType::Int))
        );
    }

    #[test]
    fn separate_primary_key_clause() {
        let Statement::CreateTable { key, columns, .. } =
            parse("create table t (a int, b text, PRIMARY KEY ((a), b))").unwrap()
        else {
            panic!("not a create table");
        };
        assert_eq!(key, "a");
        assert_eq!(columns.len(), 2);
    }

    #[test]
    fn insert_with_markers_and_literals() {
        let statement = parse("INSERT INTO t (id, n, s, b) VALUES (?, -1.5e3, 'it''s', 0xCAFE)").unwrap();
        assert_eq!(statement.markers(), 1);
        let Statement::Insert { values, .. } = statement else {
            panic!("not an insert");
        };
        assert_eq!(values[1], Term::Literal(Literal::Number("-1.5e3".into())));
        assert_eq!(values[2], Term::Literal(Literal::Str("it's".into())));
        assert_eq!(values[3], Term::Literal(Literal::Hex("CAFE".into())));
    }

    #[test]
    fn select_forms() {
        assert_eq!(parse("SELECT * FROM ks.t").unwrap().markers(), 0);
        assert_eq!(parse("SELECT a, \"B\" FROM t WHERE id = ?").unwrap().markers(), 1);
        assert_eq!(parse("select * from t where id in (?, 1, ?)").unwrap().markers(), 2);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse("SELEC * FROM t").is_err());
        assert!(parse("INSERT INTO t (a, b) VALUES (?)").is_err());
        assert!(parse("SELECT * FROM t LIMIT 1").is_err());
        assert!(parse("CREATE TABLE t (a int)").is_err());
        assert!(parse("SELECT 'open FROM t").is_err());
    }
}
