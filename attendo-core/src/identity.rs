use std::fmt;

/// Placeholder for department and section when an identifier has too few tokens
pub const UNKNOWN_FIELD: &str = "N/A";

const DELIMITER: char = '_';

/// Student identity decoded from a composite identifier
/// (`{ticket_id}_{name}_{department}_{section}`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub ticket_id: String,
    pub display_name: String,
    pub department: String,
    pub section: String,
}

impl Identity {
    /// Decode an identifier. Never fails: anything with fewer than four tokens
    /// is used verbatim as both ticket id and display name.
    pub fn decode(identifier: &str) -> Self {
        let parts: Vec<&str> = identifier.split(DELIMITER).collect();

        if parts.len() < 4 {
            return Self {
                ticket_id: identifier.to_string(),
                display_name: identifier.to_string(),
                department: UNKNOWN_FIELD.to_string(),
                section: UNKNOWN_FIELD.to_string(),
            };
        }

        let last = parts.len() - 1;
        Self {
            ticket_id: parts[0].to_string(),
            display_name: parts[1..last - 1].join(" "),
            department: parts[last - 1].to_string(),
            section: parts[last].to_string(),
        }
    }

    /// Name shown on overlays and operator messages
    pub fn display_name(&self) -> &str {
        &self.display_name
    }
}

/// Build an identifier from the four enrollment fields.
///
/// Whitespace inside a field becomes `_`. Underscores already present in a
/// field are not escaped, so a department like `Comp_Sci` decodes into
/// shifted fields.
pub fn encode(ticket_id: &str, name: &str, department: &str, section: &str) -> String {
    [ticket_id, name, department, section]
        .iter()
        .map(|field| field.replace(char::is_whitespace, "_"))
        .collect::<Vec<_>>()
        .join("_")
}

/// Shorthand for [`Identity::decode`]
pub fn decode(identifier: &str) -> Identity {
    Identity::decode(identifier)
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode(
            &self.ticket_id,
            &self.display_name,
            &self.department,
            &self.section,
        ))
    }
}
