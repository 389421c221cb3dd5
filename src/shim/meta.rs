use std::fmt::Write as _;
use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::codec::KeyType;
use crate::error::{KdError, Result};
use crate::shim::spec::dimension_names;

/// Contents of the `.meta` file: the declared fields and the key type of every dimension.
///
/// The file is whitespace separated text:
///
/// ```text
/// 2
/// pickup
/// dropoff
/// 1
/// time
/// 1 1 1 1 0
/// ```
///
/// the number of 2D fields and their names, the number of scalar fields and their names, then
/// one type tag per dimension (`0` integer, `1` float).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMeta {
    geo_fields: Vec<String>,
    scalar_fields: Vec<String>,
    types: Vec<KeyType>,
}

impl IndexMeta {
    pub fn new(
        geo_fields: Vec<String>,
        scalar_fields: Vec<String>,
        types: Vec<KeyType>,
    ) -> Result<Self> {
        let meta = Self {
            geo_fields,
            scalar_fields,
            types,
        };
        if meta.types.len() != meta.dims() {
            return Err(KdError::Format(format!(
                "{} key types for {} dimensions",
                meta.types.len(),
                meta.dims()
            )));
        }
        Ok(meta)
    }

    pub fn geo_fields(&self) -> &[String] {
        &self.geo_fields
    }

    pub fn scalar_fields(&self) -> &[String] {
        &self.scalar_fields
    }

    pub fn types(&self) -> &[KeyType] {
        &self.types
    }

    pub fn dims(&self) -> usize {
        2 * self.geo_fields.len() + self.scalar_fields.len()
    }

    pub fn dimension_names(&self) -> Vec<String> {
        dimension_names(&self.geo_fields, self.scalar_fields.iter())
    }

    /// The dimension holding `name`: a scalar field or one component (`<field>.x`,
    /// `<field>.y`) of a 2D field.
    pub fn dimension(&self, name: &str) -> Option<usize> {
        if let Some(i) = self.scalar_fields.iter().position(|f| f == name) {
            return Some(2 * self.geo_fields.len() + i);
        }
        let (field, component) = name.rsplit_once('.')?;
        let i = self.geo_fields.iter().position(|f| f == field)?;
        match component {
            "x" => Some(2 * i),
            "y" => Some(2 * i + 1),
            _ => None,
        }
    }

    /// The x dimension of a 2D field.
    pub fn geo_dimension(&self, field: &str) -> Option<usize> {
        self.geo_fields.iter().position(|f| f == field).map(|i| 2 * i)
    }

    /// Whether a predicate over `name` can be answered by this index.
    pub fn is_indexed(&self, name: &str) -> bool {
        self.geo_dimension(name).is_some() || self.dimension(name).is_some()
    }

    pub fn key_type(&self, dim: usize) -> KeyType {
        self.types[dim]
    }

    pub fn to_text(&self) -> String {
        let mut text = String::new();
        for fields in [&self.geo_fields, &self.scalar_fields] {
            let _ = writeln!(text, "{}", fields.len());
            for field in fields {
                let _ = writeln!(text, "{}", field);
            }
        }
        let tags: Vec<String> = self.types.iter().map(|t| t.tag().to_string()).collect();
        let _ = writeln!(text, "{}", tags.join(" "));
        text
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut tokens = text.split_whitespace();
        let geo_fields = read_fields(&mut tokens)?;
        let scalar_fields = read_fields(&mut tokens)?;

        let dims = 2 * geo_fields.len() + scalar_fields.len();
        let types = (0..dims)
            .map(|_| {
                let tag = expect(&mut tokens, "a key type")?;
                let tag = tag
                    .parse()
                    .map_err(|_| KdError::Format(format!("bad key type tag {:?}", tag)))?;
                KeyType::from_tag(tag)
            })
            .collect::<Result<Vec<_>>>()?;
        if let Some(extra) = tokens.next() {
            return Err(KdError::Format(format!(
                "unexpected {:?} after the key types",
                extra
            )));
        }
        Self::new(geo_fields, scalar_fields, types)
    }

    pub fn read(path: &Path) -> Result<Self> {
        Self::parse(&fs::read_to_string(path)?)
    }

    /// Write the file through a temporary file in the same directory.
    pub fn write(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut file = NamedTempFile::new_in(dir)?;
        file.write_all(self.to_text().as_bytes())?;
        file.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

fn expect<'a>(tokens: &mut impl Iterator<Item = &'a str>, what: &str) -> Result<&'a str> {
    tokens
        .next()
        .ok_or_else(|| KdError::Format(format!("meta file ends before {}", what)))
}

fn read_fields<'a>(tokens: &mut impl Iterator<Item = &'a str>) -> Result<Vec<String>> {
    let count = expect(tokens, "a field count")?;
    let count: usize = count
        .parse()
        .map_err(|_| KdError::Format(format!("bad field count {:?}", count)))?;
    (0..count)
        .map(|_| expect(tokens, "a field name").map(str::to_string))
        .collect()
}
