//! Symbol catalog loading.
//!
//! The catalog is a CSV file with the header
//! `symbol_id,symbol,price,volatility,drift`. The server loads the full
//! row to seed its price processes; the client only needs the id-to-name
//! mapping for display. Rows with out-of-range ids or unparseable fields
//! are skipped with a warning.

use crate::errors::CatalogError;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// One catalog row: the static definition of a simulated symbol.
#[derive(Clone, Debug, PartialEq)]
pub struct SymbolDef {
    /// Wire identifier, unique and `< num_symbols`.
    pub symbol_id: u16,
    /// Human-readable ticker name.
    pub name: String,
    /// Initial mid price.
    pub price: f64,
    /// Volatility (sigma) of the price process.
    pub volatility: f64,
    /// Drift (mu) of the price process.
    pub drift: f64,
}

/// Loads the full catalog for the server.
///
/// The header row is skipped. Rows whose `symbol_id` is not below
/// `num_symbols` are dropped with a warning, as are rows that fail to
/// parse.
///
/// # Errors
/// [`CatalogError::ReadError`] when the file cannot be read, and
/// [`CatalogError::Empty`] when no usable row survives; both are fatal
/// at server startup.
pub fn load_catalog<P: AsRef<Path>>(
    path: P,
    num_symbols: usize,
) -> Result<Vec<SymbolDef>, CatalogError> {
    let display = path.as_ref().display().to_string();
    let file = File::open(&path).map_err(|e| CatalogError::ReadError(e.to_string()))?;
    let reader = BufReader::new(file);

    let mut symbols = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| CatalogError::ReadError(e.to_string()))?;
        if line_no == 0 {
            // Header row.
            continue;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match parse_row(trimmed) {
            Some(def) if (def.symbol_id as usize) < num_symbols => symbols.push(def),
            Some(def) => {
                log::warn!(
                    "Symbol ID {} exceeds max symbols {}, skipping",
                    def.symbol_id,
                    num_symbols
                );
            }
            None => {
                log::warn!("Skipping malformed catalog row {}: '{}'", line_no + 1, trimmed);
            }
        }
    }

    if symbols.is_empty() {
        return Err(CatalogError::Empty(display));
    }

    log::info!("Loaded {} symbols from {}", symbols.len(), display);
    Ok(symbols)
}

/// Loads only the id-to-name mapping for the client.
///
/// Returns a vector of `num_symbols` names where ids missing from the
/// file keep their [`default_symbol_names`] placeholder.
pub fn load_symbol_names<P: AsRef<Path>>(
    path: P,
    num_symbols: usize,
) -> Result<Vec<String>, CatalogError> {
    let mut names = default_symbol_names(num_symbols);
    let mut loaded = 0usize;

    for def in load_catalog(path, num_symbols)? {
        names[def.symbol_id as usize] = def.name;
        loaded += 1;
    }

    log::info!("Loaded {} symbol names", loaded);
    Ok(names)
}

/// Placeholder names (`SYM0`, `SYM1`, ...) used until a catalog is
/// loaded, and for ids the catalog does not cover.
pub fn default_symbol_names(num_symbols: usize) -> Vec<String> {
    (0..num_symbols).map(|i| format!("SYM{}", i)).collect()
}

fn parse_row(row: &str) -> Option<SymbolDef> {
    let mut fields = row.split(',');
    let symbol_id = fields.next()?.trim().parse().ok()?;
    let name = fields.next()?.trim();
    if name.is_empty() {
        return None;
    }
    let price = fields.next()?.trim().parse().ok()?;
    let volatility = fields.next()?.trim().parse().ok()?;
    let drift = fields.next()?.trim().parse().ok()?;

    Some(SymbolDef {
        symbol_id,
        name: name.to_string(),
        price,
        volatility,
        drift,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_catalog(rows: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "symbol_id,symbol,price,volatility,drift").unwrap();
        for row in rows {
            writeln!(file, "{}", row).unwrap();
        }
        file
    }

    #[test]
    fn test_load_catalog() {
        let file = write_catalog(&[
            "0,AAPL,150.0,0.2,0.05",
            "1,GOOG,2800.0,0.25,0.03",
            "2,MSFT,300.0,0.18,0.04",
        ]);

        let symbols = load_catalog(file.path(), 100).unwrap();
        assert_eq!(symbols.len(), 3);
        assert_eq!(symbols[0].name, "AAPL");
        assert_eq!(symbols[1].symbol_id, 1);
        assert_eq!(symbols[1].price, 2800.0);
        assert_eq!(symbols[2].volatility, 0.18);
        assert_eq!(symbols[2].drift, 0.04);
    }

    #[test]
    fn test_out_of_range_and_malformed_rows_skipped() {
        let file = write_catalog(&[
            "0,AAPL,150.0,0.2,0.05",
            "999,BOGUS,1.0,0.1,0.0",
            "not-a-number,JUNK,1.0,0.1,0.0",
            "1,MISSING_FIELDS,1.0",
        ]);

        let symbols = load_catalog(file.path(), 10).unwrap();
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].name, "AAPL");
    }

    #[test]
    fn test_empty_catalog_is_fatal() {
        let file = write_catalog(&[]);
        assert!(matches!(
            load_catalog(file.path(), 10),
            Err(CatalogError::Empty(_))
        ));

        assert!(matches!(
            load_catalog("nonexistent_symbols.csv", 10),
            Err(CatalogError::ReadError(_))
        ));
    }

    #[test]
    fn test_symbol_names_with_defaults() {
        let file = write_catalog(&["0,AAPL,150.0,0.2,0.05", "3,TSLA,700.0,0.4,0.02"]);

        let names = load_symbol_names(file.path(), 5).unwrap();
        assert_eq!(names, vec!["AAPL", "SYM1", "SYM2", "TSLA", "SYM4"]);
    }
}
