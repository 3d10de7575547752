use std::{fmt::Display, str::FromStr};

use regex_lite::Regex;
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

use super::ParseError;

/// Registry-qualified identity of a published module: `registry/owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct FullName {
    registry: String,
    owner: String,
    name: String,
}

impl FullName {
    pub fn new(
        registry: impl Into<String>,
        owner: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<FullName, ParseError> {
        let full_name = FullName {
            registry: registry.into(),
            owner: owner.into(),
            name: name.into(),
        };
        for (component, value) in [
            ("registry", &full_name.registry),
            ("owner", &full_name.owner),
            ("name", &full_name.name),
        ] {
            if value.is_empty() || value.contains('/') {
                return Err(ParseError::MissingNameComponent(
                    component.to_string(),
                    full_name.to_string(),
                ));
            }
        }
        Ok(full_name)
    }

    pub fn parse(s: &str) -> Result<FullName, ParseError> {
        let re: Regex =
            Regex::new(r"^(?P<registry>[^/]+)/(?P<owner>[^/]+)/(?P<name>[^/]+)$").unwrap();
        let captures = re.captures(s);
        let captures = captures.as_ref();

        let component = |component: &str| {
            captures
                .and_then(|c| c.name(component))
                .map(|m| m.as_str().to_string())
                .ok_or_else(|| ParseError::MissingNameComponent(component.to_string(), s.to_string()))
        };

        Ok(FullName {
            registry: component("registry")?,
            owner: component("owner")?,
            name: component("name")?,
        })
    }

    pub fn registry(&self) -> &str {
        &self.registry
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Display for FullName {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.registry, self.owner, self.name)
    }
}

impl FromStr for FullName {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FullName::parse(s)
    }
}

impl Serialize for FullName {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FullName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        FullName::parse(&s).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_full_name() {
        let full_name = FullName::parse("buf.build/acme/weather").unwrap();
        assert_eq!(full_name.registry(), "buf.build");
        assert_eq!(full_name.owner(), "acme");
        assert_eq!(full_name.name(), "weather");
        assert_eq!(full_name.to_string(), "buf.build/acme/weather");
    }

    #[test]
    fn parse_invalid_full_name() {
        assert!(FullName::parse("buf.build/acme").is_err());
        assert!(FullName::parse("buf.build/acme/weather/extra").is_err());
        assert!(FullName::parse("").is_err());
    }

    #[test]
    fn new_rejects_empty_components() {
        assert!(FullName::new("buf.build", "", "weather").is_err());
        assert!(FullName::new("buf.build", "acme/x", "weather").is_err());
        assert_eq!(
            FullName::new("buf.build", "acme", "weather").unwrap(),
            FullName::parse("buf.build/acme/weather").unwrap()
        );
    }
}
