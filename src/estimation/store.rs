// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Durable storage of named, versioned parameter sets.

use std::collections::HashMap;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{anyhow, Context, Result};
use tempfile::NamedTempFile;

use crate::errors::Error;
use crate::estimation::error_model::ErrorModelParameters;

/// Version of the persisted record layout. Records with a newer version are rejected.
pub const FORMAT_VERSION: u32 = 1;

pub trait ParameterStore {
    /// Load the parameter set with the given identifier.
    fn load(&self, id: &str) -> Result<ErrorModelParameters>;

    /// Save the parameter set under the given identifier, replacing any previous one.
    /// The replacement is atomic: readers either see the old or the new set.
    fn save(&self, id: &str, parameters: &ErrorModelParameters) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CreatedBy {
    program: String,
    version: String,
}

impl Default for CreatedBy {
    fn default() -> Self {
        CreatedBy {
            program: env!("CARGO_PKG_NAME").to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ParameterRecord {
    format_version: u32,
    name: String,
    created_by: CreatedBy,
    parameters: ErrorModelParameters,
}

fn encode(id: &str, parameters: &ErrorModelParameters) -> ParameterRecord {
    ParameterRecord {
        format_version: FORMAT_VERSION,
        name: id.to_owned(),
        created_by: CreatedBy::default(),
        parameters: parameters.clone(),
    }
}

fn decode(id: &str, content: &str) -> Result<ErrorModelParameters> {
    let invalid = |msg: String| Error::InvalidParameterFile {
        id: id.to_owned(),
        msg,
    };

    let value: serde_json::Value =
        serde_json::from_str(content).map_err(|e| invalid(e.to_string()))?;
    let version = value
        .get("format_version")
        .and_then(|version| version.as_u64())
        .ok_or_else(|| invalid("missing format version".to_owned()))?;
    if version > FORMAT_VERSION as u64 {
        return Err(Error::IncompatibleVersion {
            id: id.to_owned(),
            found: version as u32,
            supported: FORMAT_VERSION,
        }
        .into());
    }

    let record: ParameterRecord =
        serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?;
    let mut parameters = record.parameters;
    parameters
        .sort_coefficients()
        .map_err(|(base, length)| {
            invalid(format!(
                "multiple coefficients for homopolymer group {}{}",
                base, length
            ))
        })?;
    parameters.validate()?;
    Ok(parameters)
}

/// Parameter sets stored as JSON files. Identifiers are file paths, relative ones are
/// resolved against the base directory if given.
#[derive(Debug, Clone, Default)]
pub struct JsonFileStore {
    base: Option<PathBuf>,
}

impl JsonFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base(base: impl AsRef<Path>) -> Self {
        JsonFileStore {
            base: Some(base.as_ref().to_owned()),
        }
    }

    pub fn path(&self, id: &str) -> PathBuf {
        match &self.base {
            Some(base) => base.join(id),
            None => PathBuf::from(id),
        }
    }
}

impl ParameterStore for JsonFileStore {
    fn load(&self, id: &str) -> Result<ErrorModelParameters> {
        let path = self.path(id);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::NotFound { id: id.to_owned() }.into())
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };
        decode(id, &content)
    }

    fn save(&self, id: &str, parameters: &ErrorModelParameters) -> Result<()> {
        let path = self.path(id);
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_owned(),
            _ => PathBuf::from("."),
        };

        let mut tmp = NamedTempFile::new_in(&dir)
            .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, &encode(id, parameters))?;
            writeln!(writer)?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&path)
            .map_err(|e| e.error)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        Ok(())
    }
}

/// Parameter sets held in memory, in their serialized form.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records
            .read()
            .map(|records| records.contains_key(id))
            .unwrap_or(false)
    }
}

impl ParameterStore for MemoryStore {
    fn load(&self, id: &str) -> Result<ErrorModelParameters> {
        let records = self
            .records
            .read()
            .map_err(|_| anyhow!("parameter store lock poisoned"))?;
        let content = records
            .get(id)
            .ok_or_else(|| Error::NotFound { id: id.to_owned() })?;
        decode(id, content)
    }

    fn save(&self, id: &str, parameters: &ErrorModelParameters) -> Result<()> {
        let content = serde_json::to_string(&encode(id, parameters))?;
        self.records
            .write()
            .map_err(|_| anyhow!("parameter store lock poisoned"))?
            .insert(id.to_owned(), content);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimation::error_model::{Coefficient, Provenance};
    use tempfile::tempdir;

    fn parameters() -> ErrorModelParameters {
        ErrorModelParameters::from_coefficients(
            Provenance::Seeded,
            vec![
                Coefficient::new('A', 2, 0.1 / 3.0, 1e-7),
                Coefficient::new('C', 12, 0.0, 0.19166666666666668),
            ],
        )
        .with_sample("NA12878")
    }

    fn error_of(result: Result<ErrorModelParameters>) -> Error {
        match result {
            Ok(_) => panic!("expected an error"),
            Err(e) => e.downcast::<Error>().unwrap(),
        }
    }

    #[test]
    fn test_round_trip() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::with_base(dir.path());
        store.save("params.json", &parameters()).unwrap();
        assert_eq!(store.load("params.json").unwrap(), parameters());

        let store = MemoryStore::new();
        store.save("params", &parameters()).unwrap();
        assert!(store.contains("params"));
        assert_eq!(store.load("params").unwrap(), parameters());
    }

    #[test]
    fn test_save_replaces() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::with_base(dir.path());
        store.save("params.json", &parameters()).unwrap();
        let other = ErrorModelParameters::from_coefficients(Provenance::Fitted, vec![]);
        store.save("params.json", &other).unwrap();
        assert_eq!(store.load("params.json").unwrap(), other);
        // no temporary files are left behind
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_not_found() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::with_base(dir.path());
        assert_eq!(
            error_of(store.load("missing.json")),
            Error::NotFound {
                id: "missing.json".to_owned()
            }
        );
        assert_eq!(
            error_of(MemoryStore::new().load("missing")),
            Error::NotFound {
                id: "missing".to_owned()
            }
        );
    }

    #[test]
    fn test_incompatible_version() {
        let mut record = serde_json::to_value(encode("params", &parameters())).unwrap();
        record["format_version"] = serde_json::json!(FORMAT_VERSION + 1);
        assert_eq!(
            error_of(decode("params", &record.to_string())),
            Error::IncompatibleVersion {
                id: "params".to_owned(),
                found: FORMAT_VERSION + 1,
                supported: FORMAT_VERSION,
            }
        );
    }

    #[test]
    fn test_invalid_files() {
        match error_of(decode("params", "{\"no\": \"version\"}")) {
            Error::InvalidParameterFile { .. } => (),
            e => panic!("unexpected error {:?}", e),
        }
        match error_of(decode("params", "not json")) {
            Error::InvalidParameterFile { .. } => (),
            e => panic!("unexpected error {:?}", e),
        }
    }

    #[test]
    fn test_coefficient_order_is_restored() {
        let parameters = ErrorModelParameters::from_coefficients(
            Provenance::Fitted,
            vec![
                Coefficient::new('A', 2, 0.01, 0.02),
                Coefficient::new('C', 3, 0.03, 0.04),
                Coefficient::new('T', 4, 0.05, 0.06),
            ],
        );
        let mut record = serde_json::to_value(encode("params", &parameters)).unwrap();
        record["parameters"]["coefficients"]
            .as_array_mut()
            .unwrap()
            .reverse();

        let loaded = decode("params", &record.to_string()).unwrap();
        assert_eq!(loaded, parameters);
        assert_relative_eq!(*loaded.indel_rate('A', 2).unwrap(), 0.03);
        assert!(loaded.coefficient('T', 4).is_some());
    }

    #[test]
    fn test_duplicate_coefficients() {
        let parameters = ErrorModelParameters::from_coefficients(
            Provenance::Fitted,
            vec![Coefficient::new('A', 2, 0.01, 0.02)],
        );
        let mut record = serde_json::to_value(encode("params", &parameters)).unwrap();
        let coefficients = record["parameters"]["coefficients"].as_array_mut().unwrap();
        let duplicate = coefficients[0].clone();
        coefficients.push(duplicate);
        match error_of(decode("params", &record.to_string())) {
            Error::InvalidParameterFile { msg, .. } => assert!(msg.contains("A2")),
            e => panic!("unexpected error {:?}", e),
        }
    }

    #[test]
    fn test_invalid_coefficient() {
        let invalid = ErrorModelParameters::from_coefficients(
            Provenance::Fitted,
            vec![Coefficient::new('G', 4, 0.7, 0.6)],
        );
        let store = MemoryStore::new();
        store.save("invalid", &invalid).unwrap();
        match error_of(store.load("invalid")) {
            Error::InvalidCoefficient { base, length, .. } => {
                assert_eq!((base, length), ('G', 4));
            }
            e => panic!("unexpected error {:?}", e),
        }
    }
}
