//! Connection parameter map handed to plugin constructors.

// self
use crate::{_prelude::*, error::ConfigError};

/// String-to-string parameter map from the connection configuration.
///
/// Unrecognized keys pass through untouched; plugins read only their declared names.
/// An empty value counts as absent, matching how connection strings treat blanks.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamMap(BTreeMap<String, String>);
impl ParamMap {
	/// Creates an empty map.
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets a parameter, replacing any previous value.
	pub fn set(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.0.insert(name.into(), value.into());

		self
	}

	/// Returns the parameter value, treating empty strings as absent.
	pub fn get(&self, name: &str) -> Option<&str> {
		self.0.get(name).map(String::as_str).filter(|value| !value.is_empty())
	}

	/// Returns the parameter or fails with a missing-parameter error for `plugin`.
	pub fn require(
		&self,
		plugin: &'static str,
		name: &'static str,
	) -> Result<&str, ConfigError> {
		self.get(name).ok_or(ConfigError::MissingParameter { plugin, name })
	}

	/// Parses an optional `u16` parameter (ports).
	pub fn get_u16(
		&self,
		plugin: &'static str,
		name: &'static str,
	) -> Result<Option<u16>, ConfigError> {
		self.get(name)
			.map(|raw| {
				raw.parse().map_err(|_| {
					ConfigError::invalid_parameter(plugin, name, format!("`{raw}` is not a port"))
				})
			})
			.transpose()
	}

	/// Parses an optional `u64` parameter (durations in seconds).
	pub fn get_u64(
		&self,
		plugin: &'static str,
		name: &'static str,
	) -> Result<Option<u64>, ConfigError> {
		self.get(name)
			.map(|raw| {
				raw.parse().map_err(|_| {
					ConfigError::invalid_parameter(
						plugin,
						name,
						format!("`{raw}` is not a number of seconds"),
					)
				})
			})
			.transpose()
	}

	/// Parses an optional boolean parameter (`true`/`false`/`1`/`0`, case-insensitive).
	pub fn get_bool(
		&self,
		plugin: &'static str,
		name: &'static str,
	) -> Result<Option<bool>, ConfigError> {
		self.get(name)
			.map(|raw| match raw.to_ascii_lowercase().as_str() {
				"true" | "1" => Ok(true),
				"false" | "0" => Ok(false),
				_ => Err(ConfigError::invalid_parameter(
					plugin,
					name,
					format!("`{raw}` is not a boolean"),
				)),
			})
			.transpose()
	}

	/// Parses a required HTTPS URL parameter.
	///
	/// Identity-provider endpoints must not downgrade to plain HTTP.
	pub fn require_https_url(
		&self,
		plugin: &'static str,
		name: &'static str,
	) -> Result<Url, ConfigError> {
		let raw = self.require(plugin, name)?;
		let url = Url::parse(raw).map_err(|e| {
			ConfigError::invalid_parameter(plugin, name, e.to_string())
		})?;

		if url.scheme() != "https" {
			return Err(ConfigError::invalid_parameter(
				plugin,
				name,
				"only https endpoints are allowed",
			));
		}

		Ok(url)
	}

	/// Comma-separated list parameter, trimmed, empties dropped.
	pub fn get_list(&self, name: &str) -> Vec<String> {
		self.get(name)
			.map(|raw| {
				raw.split(',')
					.map(str::trim)
					.filter(|item| !item.is_empty())
					.map(str::to_owned)
					.collect()
			})
			.unwrap_or_default()
	}
}
impl FromIterator<(String, String)> for ParamMap {
	fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
		Self(iter.into_iter().collect())
	}
}
impl From<BTreeMap<String, String>> for ParamMap {
	fn from(map: BTreeMap<String, String>) -> Self {
		Self(map)
	}
}
