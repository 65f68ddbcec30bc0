//! Student directory: maps gallery labels to people for the event log.
//!
//! Gallery labels look like `<codigo>_<free text>`; the directory is keyed
//! by `codigo`.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("read student directory {path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Student {
    pub codigo: String,
    #[serde(default)]
    pub nombre: String,
    #[serde(default)]
    pub apellido: String,
    #[serde(default)]
    pub grado: String,
    #[serde(default, rename = "ruta_carpeta")]
    pub folder: String,
}

/// Who an event row is about.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PersonInfo {
    pub name: String,
    pub codigo: String,
    pub grado: String,
}

#[derive(Debug, Clone, Default)]
pub struct StudentDirectory {
    by_codigo: HashMap<String, Student>,
}

/// Text before the first `_`, or the whole label.
pub fn codigo_for_label(label: &str) -> &str {
    label.split('_').next().unwrap_or(label)
}

impl StudentDirectory {
    pub fn load(path: &Path) -> Result<Self, DirectoryError> {
        let err = |source| DirectoryError::Csv {
            path: path.display().to_string(),
            source,
        };
        let reader = csv::Reader::from_path(path).map_err(err)?;
        let directory = Self::from_reader(reader).map_err(err)?;
        tracing::info!(path = %path.display(), students = directory.len(), "student directory loaded");
        Ok(directory)
    }

    /// Missing or unreadable file yields an empty directory.
    pub fn load_or_empty(path: &Path) -> Self {
        match Self::load(path) {
            Ok(directory) => directory,
            Err(error) => {
                tracing::warn!(%error, "continuing without student directory");
                Self::default()
            }
        }
    }

    fn from_reader<R: std::io::Read>(mut reader: csv::Reader<R>) -> Result<Self, csv::Error> {
        let mut by_codigo = HashMap::new();
        for row in reader.deserialize::<Student>() {
            let student = row?;
            by_codigo.insert(student.codigo.trim().to_string(), student);
        }
        Ok(Self { by_codigo })
    }

    pub fn get(&self, codigo: &str) -> Option<&Student> {
        self.by_codigo.get(codigo)
    }

    pub fn len(&self) -> usize {
        self.by_codigo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_codigo.is_empty()
    }

    /// Event columns for a known gallery label.
    pub fn resolve(&self, label: &str) -> PersonInfo {
        let codigo = codigo_for_label(label);
        match self.get(codigo) {
            Some(student) => PersonInfo {
                name: format!("{} {}", student.nombre, student.apellido).trim().to_string(),
                codigo: codigo.to_string(),
                grado: student.grado.clone(),
            },
            None => PersonInfo {
                name: label.to_string(),
                codigo: codigo.to_string(),
                grado: String::new(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory(csv_text: &str) -> StudentDirectory {
        StudentDirectory::from_reader(csv::Reader::from_reader(csv_text.as_bytes())).unwrap()
    }

    #[test]
    fn test_codigo_for_label() {
        assert_eq!(codigo_for_label("1023_ana_perez"), "1023");
        assert_eq!(codigo_for_label("visitante"), "visitante");
    }

    #[test]
    fn test_resolve_known_student() {
        let dir = directory("codigo,nombre,apellido,grado,ruta_carpeta\n1023,Ana,Perez,5B,dataset/1023\n");
        assert_eq!(
            dir.resolve("1023_ana"),
            PersonInfo {
                name: "Ana Perez".into(),
                codigo: "1023".into(),
                grado: "5B".into(),
            }
        );
        assert_eq!(dir.get("1023").unwrap().folder, "dataset/1023");
    }

    #[test]
    fn test_resolve_missing_student_uses_label() {
        let dir = directory("codigo,nombre,apellido,grado\n1,A,B,1A\n");
        let info = dir.resolve("77_juan");
        assert_eq!(info.name, "77_juan");
        assert_eq!(info.codigo, "77");
        assert!(info.grado.is_empty());
    }

    #[test]
    fn test_missing_file_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = StudentDirectory::load_or_empty(&tmp.path().join("estudiantes.csv"));
        assert!(dir.is_empty());
    }

    #[test]
    fn test_load_from_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("estudiantes.csv");
        std::fs::write(&path, "codigo,nombre,apellido,grado\n5,Eva,Rios,3A\n").unwrap();
        let dir = StudentDirectory::load(&path).unwrap();
        assert_eq!(dir.resolve("5_x").name, "Eva Rios");
    }
}
