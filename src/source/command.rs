//! Subprocess adaptor: one external command per CRUD verb.
//!
//! Command templates come from configuration. `%fk` expands to the foreign
//! key text; documents travel as JSON on stdin/stdout. Exit status 2 means
//! "this key is gone"; any other non-zero exit makes the source unavailable
//! for the round.

use std::io::Write;
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};

use crate::core::{Document, EntityName, ForeignKey, SourceName};

use super::{DataSource, DataSourceError};

const GONE_EXIT_CODE: i32 = 2;

/// The four command templates for one source, as configured.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandTemplates {
    pub create: String,
    pub read: String,
    pub update: String,
    pub delete: String,
}

pub struct CommandSource {
    entity: EntityName,
    source: SourceName,
    templates: CommandTemplates,
}

impl CommandSource {
    pub fn new(entity: EntityName, source: SourceName, templates: CommandTemplates) -> Self {
        Self {
            entity,
            source,
            templates,
        }
    }

    fn run(
        &self,
        template: &str,
        fk: Option<&ForeignKey>,
        stdin_doc: Option<&Document>,
    ) -> Result<String, DataSourceError> {
        let argv = expand_template(template, fk.map(|fk| fk.key.as_str()));
        let Some((program, args)) = argv.split_first() else {
            return Err(DataSourceError::Unavailable {
                reason: "empty command template".into(),
            });
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|err| DataSourceError::Unavailable {
            reason: format!("failed to spawn `{program}`: {err}"),
        })?;

        if let Some(doc) = stdin_doc {
            let payload = doc.to_json().to_string();
            if let Some(mut stdin) = child.stdin.take() {
                // A child that exits without reading stdin closes the pipe;
                // that is its answer, not a spawn failure.
                let _ = stdin.write_all(payload.as_bytes());
            }
        } else {
            drop(child.stdin.take());
        }

        let output = child
            .wait_with_output()
            .map_err(|err| DataSourceError::Unavailable {
                reason: format!("failed to wait for `{program}`: {err}"),
            })?;

        if output.status.code() == Some(GONE_EXIT_CODE) {
            if let Some(fk) = fk {
                return Err(DataSourceError::Gone { fk: fk.clone() });
            }
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DataSourceError::Unavailable {
                reason: format!(
                    "`{program}` exited with {}: {}",
                    output.status,
                    stderr.trim()
                ),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn parse_document(&self, stdout: &str) -> Result<Document, DataSourceError> {
        let json = serde_json::from_str(stdout.trim()).map_err(|err| {
            DataSourceError::Malformed(crate::core::DocumentError::MalformedJson {
                reason: err.to_string(),
            })
        })?;
        Ok(Document::from_json(&json)?)
    }

    fn parse_key(&self, stdout: &str) -> Result<ForeignKey, DataSourceError> {
        let key = stdout.trim();
        ForeignKey::new(self.entity.clone(), self.source.clone(), key).map_err(|err| {
            DataSourceError::Unavailable {
                reason: format!("adaptor returned an invalid foreign key: {err}"),
            }
        })
    }
}

impl DataSource for CommandSource {
    fn create(&self, doc: &Document) -> Result<ForeignKey, DataSourceError> {
        let stdout = self.run(&self.templates.create, None, Some(doc))?;
        self.parse_key(&stdout)
    }

    fn read(&self, fk: &ForeignKey) -> Result<Document, DataSourceError> {
        let stdout = self.run(&self.templates.read, Some(fk), None)?;
        self.parse_document(&stdout)
    }

    fn update(&self, fk: &ForeignKey, doc: &Document) -> Result<ForeignKey, DataSourceError> {
        let stdout = self.run(&self.templates.update, Some(fk), Some(doc))?;
        // An empty stdout keeps the existing key.
        if stdout.trim().is_empty() {
            Ok(fk.clone())
        } else {
            self.parse_key(&stdout)
        }
    }

    fn delete(&self, fk: &ForeignKey) -> Result<(), DataSourceError> {
        self.run(&self.templates.delete, Some(fk), None)?;
        Ok(())
    }
}

/// Whitespace-tokenize a template and substitute `%fk` inside each token.
fn expand_template(template: &str, fk: Option<&str>) -> Vec<String> {
    template
        .split_whitespace()
        .map(|token| match fk {
            Some(key) => token.replace("%fk", key),
            None => token.to_string(),
        })
        .collect()
}
