use crate::error::LoadError;

/// An exported code symbol. `value` is an instruction index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub value: usize,
}

/// Code symbols of a module, ordered by address.
#[derive(Clone, Debug, Default)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
}

impl SymbolTable {
    pub fn new(mut symbols: Vec<Symbol>) -> Self {
        symbols.sort_by_key(|s| s.value);
        SymbolTable { symbols }
    }

    /// Parses a text symbol map: one `<segment> <hex value> <name>` triple per line. Only
    /// code-segment (`0`) entries are kept.
    pub fn parse_map(text: &str) -> Result<Self, LoadError> {
        let mut symbols = Vec::new();
        for (i, line) in text.lines().enumerate() {
            let line_no = i + 1;
            let mut fields = line.split_whitespace();
            let (segment, value, name) = match (fields.next(), fields.next(), fields.next()) {
                (None, _, _) => continue,
                (Some(s), Some(v), Some(n)) => (s, v, n),
                _ => {
                    return Err(LoadError::BadSymbolMap {
                        line: line_no,
                        reason: "expected `<segment> <value> <name>`".to_owned(),
                    })
                }
            };
            let segment: u32 = segment.parse().map_err(|_| LoadError::BadSymbolMap {
                line: line_no,
                reason: format!("bad segment `{}`", segment),
            })?;
            let value = usize::from_str_radix(value, 16).map_err(|_| LoadError::BadSymbolMap {
                line: line_no,
                reason: format!("bad value `{}`", value),
            })?;
            if segment == 0 {
                symbols.push(Symbol {
                    name: name.to_owned(),
                    value,
                });
            }
        }
        Ok(SymbolTable::new(symbols))
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }

    pub fn by_name(&self, name: &str) -> Option<&Symbol> {
        self.symbols.iter().find(|s| s.name == name)
    }

    /// Exact-address lookup.
    pub fn at(&self, value: usize) -> Option<&Symbol> {
        self.symbols
            .binary_search_by_key(&value, |s| s.value)
            .ok()
            .map(|i| &self.symbols[i])
    }

    /// The closest symbol at or below `pc`, with the distance from it.
    pub fn lookup(&self, pc: usize) -> Option<(&Symbol, usize)> {
        let idx = match self.symbols.binary_search_by_key(&pc, |s| s.value) {
            Ok(i) => i,
            Err(0) => return None,
            Err(i) => i - 1,
        };
        let sym = &self.symbols[idx];
        Some((sym, pc - sym.value))
    }

    pub(crate) fn max_value(&self) -> Option<usize> {
        self.symbols.last().map(|s| s.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAP: &str = "0 0 vmMain\n\
                       1 10 someGlobal\n\
                       0 2a G_Init\n\
                       \n\
                       0 14 G_RunFrame\n";

    #[test]
    fn keeps_code_symbols_sorted() {
        let table = SymbolTable::parse_map(MAP).unwrap();
        let names: Vec<_> = table.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["vmMain", "G_RunFrame", "G_Init"]);
        assert_eq!(table.by_name("G_Init").unwrap().value, 0x2a);
        assert!(table.by_name("someGlobal").is_none());
    }

    #[test]
    fn lookup_by_address() {
        let table = SymbolTable::parse_map(MAP).unwrap();
        let (sym, off) = table.lookup(0x18).unwrap();
        assert_eq!((sym.name.as_str(), off), ("G_RunFrame", 4));
        assert_eq!(table.at(0x14).unwrap().name, "G_RunFrame");
        assert!(table.at(0x15).is_none());
    }

    #[test]
    fn malformed_lines_are_errors() {
        match SymbolTable::parse_map("0 zz broken\n") {
            Err(LoadError::BadSymbolMap { line: 1, .. }) => (),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(SymbolTable::parse_map("0 12\n").is_err());
    }
}
