//! Migration Manager - File system operations for migrations
//!
//! Loads `<version>.do.<name>.sql` / `<version>.undo.<name>.sql` files and
//! splits their contents into individual statements.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use sqlparser::dialect::MySqlDialect;
use sqlparser::tokenizer::{Token, Tokenizer, TokenizerError};

use super::definitions::{Migration, MigrationConfig};
use crate::error::{OrmError, OrmResult};

/// Which half of a migration a file holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScriptKind {
    Do,
    Undo,
}

#[derive(Debug)]
struct ScriptFile {
    version: i64,
    kind: ScriptKind,
    name: String,
}

/// Migration manager for loading migrations from a directory
#[derive(Debug, Clone)]
pub struct MigrationManager {
    config: MigrationConfig,
}

impl MigrationManager {
    pub fn new(config: MigrationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Load all migrations, sorted by version.
    ///
    /// Files that do not follow the naming scheme are ignored. Two `do`
    /// scripts for one version, or an `undo` without a `do`, are errors.
    pub fn load_migrations(&self) -> OrmResult<Vec<Migration>> {
        let dir = &self.config.migrations_dir;
        let entries = fs::read_dir(dir).map_err(|e| {
            OrmError::Migration(format!("Failed to read migrations directory {}: {}", dir.display(), e))
        })?;

        let mut up: BTreeMap<i64, (String, String, String)> = BTreeMap::new();
        let mut down: BTreeMap<i64, String> = BTreeMap::new();

        for entry in entries {
            let entry = entry.map_err(|e| OrmError::Migration(format!("Failed to read directory entry: {}", e)))?;
            let path = entry.path();
            let Some(filename) = path.file_name().and_then(|name| name.to_str()).map(str::to_string) else {
                continue;
            };
            let Some(script) = parse_filename(&filename) else {
                tracing::trace!(file = %filename, "Skipping non-migration file");
                continue;
            };

            let contents = read_script(&path)?;
            match script.kind {
                ScriptKind::Do => {
                    if let Some((existing, _, _)) = up.get(&script.version) {
                        return Err(OrmError::Migration(format!(
                            "Two migrations share version {}: {} and {}",
                            script.version, existing, filename
                        )));
                    }
                    up.insert(script.version, (filename, script.name, contents));
                }
                ScriptKind::Undo => {
                    if down.insert(script.version, contents).is_some() {
                        return Err(OrmError::Migration(format!(
                            "Two undo scripts share version {}",
                            script.version
                        )));
                    }
                }
            }
        }

        if let Some(orphan) = down.keys().find(|version| !up.contains_key(version)) {
            return Err(OrmError::Migration(format!(
                "Undo script for version {} has no matching do script",
                orphan
            )));
        }

        Ok(up
            .into_iter()
            .map(|(version, (filename, name, up_sql))| Migration {
                version,
                name,
                filename,
                up_sql,
                down_sql: down.remove(&version),
            })
            .collect())
    }

    /// Highest version on disk, 0 when the directory has no migrations
    pub fn max_version(&self) -> OrmResult<i64> {
        Ok(self
            .load_migrations()?
            .last()
            .map(|migration| migration.version)
            .unwrap_or(0))
    }

    /// SQL to create the bookkeeping table (layout compatible with existing
    /// `schemaversion` tables; the checksum column is left empty)
    pub fn create_schema_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS `{}` (\n    \
                version BIGINT PRIMARY KEY,\n    \
                name TEXT,\n    \
                md5 TEXT,\n    \
                run_at TIMESTAMP NULL DEFAULT CURRENT_TIMESTAMP\n\
            )",
            self.config.schema_table
        )
    }

    pub fn applied_version_sql(&self) -> String {
        format!(
            "SELECT version FROM `{}` ORDER BY version DESC LIMIT 1",
            self.config.schema_table
        )
    }

    pub fn record_version_sql(&self) -> String {
        format!(
            "INSERT INTO `{}` (version, name, md5, run_at) VALUES (?, ?, '', NOW())",
            self.config.schema_table
        )
    }

    pub fn remove_version_sql(&self) -> String {
        format!("DELETE FROM `{}` WHERE version = ?", self.config.schema_table)
    }
}

fn read_script(path: &Path) -> OrmResult<String> {
    fs::read_to_string(path)
        .map_err(|e| OrmError::Migration(format!("Failed to read migration file {}: {}", path.display(), e)))
}

/// `001.do.create-users.sql` -> version 1, `Do`, `create-users`
fn parse_filename(filename: &str) -> Option<ScriptFile> {
    let stem = filename.strip_suffix(".sql")?;
    let mut parts = stem.splitn(3, '.');

    let version = parts.next()?.parse::<i64>().ok().filter(|version| *version > 0)?;
    let kind = match parts.next()? {
        "do" => ScriptKind::Do,
        "undo" => ScriptKind::Undo,
        _ => return None,
    };
    let name = parts.next().unwrap_or_default().to_string();

    Some(ScriptFile { version, kind, name })
}

/// Split a script into statements on top-level semicolons.
///
/// Uses the MySQL tokenizer so semicolons inside strings, quoted
/// identifiers and comments do not split. Compound bodies
/// (`BEGIN ... END` in triggers, procedures and events, and `CASE ... END`)
/// stay in one statement. Statement text is kept exactly as written.
/// Segments holding only whitespace or comments are dropped.
pub fn split_sql_statements(sql: &str) -> Vec<String> {
    match split_with_tokenizer(sql) {
        Ok(statements) => statements,
        Err(e) => {
            tracing::warn!("SQL tokenizing failed, using naive semicolon splitting: {}", e);
            sql.split(';')
                .map(str::trim)
                .filter(|statement| !statement.is_empty())
                .map(str::to_string)
                .collect()
        }
    }
}

fn split_with_tokenizer(sql: &str) -> Result<Vec<String>, TokenizerError> {
    let dialect = MySqlDialect {};
    let tokens = Tokenizer::new(&dialect, sql).tokenize_with_location()?;
    let significant: Vec<_> = tokens
        .iter()
        .filter(|token| !matches!(token.token, Token::Whitespace(_) | Token::EOF))
        .collect();

    let line_starts: Vec<usize> = std::iter::once(0)
        .chain(sql.match_indices('\n').map(|(index, _)| index + 1))
        .collect();

    let mut statements = Vec::new();
    let mut start = 0;
    let mut has_code = false;
    let mut depth: usize = 0;

    for (index, token) in significant.iter().enumerate() {
        let next = significant.get(index + 1).map(|next| &next.token);
        match &token.token {
            Token::SemiColon if depth == 0 => {
                let end = byte_offset(sql, &line_starts, token.location.line, token.location.column);
                if has_code {
                    statements.push(sql[start..end].trim().to_string());
                }
                start = end + 1;
                has_code = false;
            }
            other => {
                has_code = true;
                match keyword(other).as_deref() {
                    Some("BEGIN") if opens_block(next) => depth += 1,
                    Some("CASE") => depth += 1,
                    Some("END") if closes_block(next) => depth = depth.saturating_sub(1),
                    _ => {}
                }
            }
        }
    }

    if has_code && start < sql.len() {
        statements.push(sql[start..].trim().to_string());
    }

    Ok(statements)
}

fn keyword(token: &Token) -> Option<String> {
    match token {
        Token::Word(word) if word.quote_style.is_none() => Some(word.value.to_ascii_uppercase()),
        _ => None,
    }
}

/// `BEGIN` starts a compound block unless it is the transaction statement
/// (`BEGIN;`, `BEGIN WORK`)
fn opens_block(next: Option<&Token>) -> bool {
    match next {
        None | Some(Token::SemiColon) => false,
        Some(token) => keyword(token).as_deref() != Some("WORK"),
    }
}

/// `END IF`, `END LOOP`, `END WHILE` and `END REPEAT` close constructs that
/// only occur inside a `BEGIN` block and are not counted
fn closes_block(next: Option<&Token>) -> bool {
    !matches!(
        next.and_then(keyword).as_deref(),
        Some("IF" | "LOOP" | "WHILE" | "REPEAT")
    )
}

/// Byte offset of a 1-based line/column (columns count characters)
fn byte_offset(sql: &str, line_starts: &[usize], line: u64, column: u64) -> usize {
    let line_start = line_starts
        .get((line.max(1) - 1) as usize)
        .copied()
        .unwrap_or(sql.len());
    sql[line_start..]
        .char_indices()
        .nth((column.max(1) - 1) as usize)
        .map(|(index, _)| line_start + index)
        .unwrap_or(sql.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, contents: &str) {
        fs::write(dir.path().join(name), contents).unwrap();
    }

    #[test]
    fn test_parse_filename() {
        let script = parse_filename("001.do.create-users.sql").unwrap();
        assert_eq!((script.version, script.kind, script.name.as_str()), (1, ScriptKind::Do, "create-users"));

        let script = parse_filename("12.undo.sql").unwrap();
        assert_eq!((script.version, script.kind, script.name.as_str()), (12, ScriptKind::Undo, ""));

        assert!(parse_filename("README.md").is_none());
        assert!(parse_filename("001.redo.users.sql").is_none());
        assert!(parse_filename("000.do.zero.sql").is_none());
        assert!(parse_filename("abc.do.users.sql").is_none());
    }

    #[test]
    fn test_load_migrations_pairs_do_and_undo() {
        let dir = TempDir::new().unwrap();
        write(&dir, "002.do.add-email.sql", "ALTER TABLE users ADD email TEXT;");
        write(&dir, "001.do.create-users.sql", "CREATE TABLE users (id INT);");
        write(&dir, "001.undo.create-users.sql", "DROP TABLE users;");
        write(&dir, "notes.txt", "ignored");

        let manager = MigrationManager::new(MigrationConfig::new(dir.path()));
        let migrations = manager.load_migrations().unwrap();

        assert_eq!(migrations.len(), 2);
        assert_eq!(migrations[0].version, 1);
        assert_eq!(migrations[0].filename, "001.do.create-users.sql");
        assert_eq!(migrations[0].down_sql.as_deref(), Some("DROP TABLE users;"));
        assert_eq!(migrations[1].name, "add-email");
        assert!(migrations[1].down_sql.is_none());
        assert_eq!(manager.max_version().unwrap(), 2);
    }

    #[test]
    fn test_duplicate_versions_rejected() {
        let dir = TempDir::new().unwrap();
        write(&dir, "001.do.a.sql", "SELECT 1;");
        write(&dir, "1.do.b.sql", "SELECT 2;");

        let manager = MigrationManager::new(MigrationConfig::new(dir.path()));
        assert!(matches!(manager.load_migrations(), Err(OrmError::Migration(_))));
    }

    #[test]
    fn test_orphan_undo_rejected() {
        let dir = TempDir::new().unwrap();
        write(&dir, "003.undo.c.sql", "SELECT 1;");

        let manager = MigrationManager::new(MigrationConfig::new(dir.path()));
        assert!(manager.load_migrations().is_err());
    }

    #[test]
    fn test_empty_and_missing_directories() {
        let dir = TempDir::new().unwrap();
        let manager = MigrationManager::new(MigrationConfig::new(dir.path()));
        assert_eq!(manager.max_version().unwrap(), 0);

        let missing = MigrationManager::new(MigrationConfig::new(dir.path().join("missing")));
        assert!(missing.load_migrations().is_err());
    }

    #[test]
    fn test_split_keeps_semicolons_inside_strings_and_comments() {
        let sql = "-- seed data; with a semicolon\n\
                   INSERT INTO notes (body) VALUES ('a;b');\n\
                   /* block; comment */\n\
                   UPDATE notes SET body = \"x;y\" WHERE id = 1;\n\
                   -- trailing comment";
        let statements = split_sql_statements(sql);

        assert_eq!(statements.len(), 2);
        assert!(statements[0].ends_with("VALUES ('a;b')"));
        assert!(statements[0].starts_with("-- seed data"));
        assert!(statements[1].ends_with("WHERE id = 1"));
    }

    #[test]
    fn test_split_without_trailing_semicolon() {
        let statements = split_sql_statements("CREATE TABLE a (id INT);\nCREATE TABLE b (id INT)");
        assert_eq!(statements, vec!["CREATE TABLE a (id INT)", "CREATE TABLE b (id INT)"]);
    }

    #[test]
    fn test_split_keeps_trigger_body_together() {
        let sql = "CREATE TABLE docs (id INT, rev INT, updated DATETIME);\n\
                   CREATE TRIGGER bump BEFORE UPDATE ON docs FOR EACH ROW\n\
                   BEGIN\n  SET NEW.updated = NOW();\n  SET NEW.rev = OLD.rev + 1;\nEND;\n\
                   INSERT INTO docs VALUES (1, 0, NOW());";
        let statements = split_sql_statements(sql);

        assert_eq!(statements.len(), 3, "{:#?}", statements);
        assert!(statements[1].starts_with("CREATE TRIGGER bump"));
        assert!(statements[1].contains("SET NEW.rev = OLD.rev + 1;"));
        assert!(statements[1].ends_with("END"));
        assert!(statements[2].starts_with("INSERT INTO docs"));
    }

    #[test]
    fn test_split_procedure_with_nested_control_flow() {
        let sql = "CREATE PROCEDURE tidy(IN keep INT)\n\
                   BEGIN\n\
                     DECLARE n INT DEFAULT 0;\n\
                     IF keep > 0 THEN\n\
                       WHILE n < keep DO SET n = n + 1; END WHILE;\n\
                     END IF;\n\
                     SELECT CASE WHEN n > 1 THEN 'many' ELSE 'few' END AS amount;\n\
                   END;\n\
                   DROP TABLE IF EXISTS scratch;";
        let statements = split_sql_statements(sql);

        assert_eq!(statements.len(), 2, "{:#?}", statements);
        assert!(statements[0].ends_with("AS amount;\nEND"));
        assert_eq!(statements[1], "DROP TABLE IF EXISTS scratch");
    }

    #[test]
    fn test_split_transaction_statements_are_not_blocks() {
        let statements = split_sql_statements("BEGIN; UPDATE a SET x = 1; COMMIT;\nBEGIN WORK; DELETE FROM a; COMMIT");
        assert_eq!(
            statements,
            vec!["BEGIN", "UPDATE a SET x = 1", "COMMIT", "BEGIN WORK", "DELETE FROM a", "COMMIT"]
        );
    }

    #[test]
    fn test_split_multibyte_text() {
        let statements = split_sql_statements("INSERT INTO t VALUES ('héllo'); SELECT 'ü';");
        assert_eq!(statements, vec!["INSERT INTO t VALUES ('héllo')", "SELECT 'ü'"]);
    }
}
