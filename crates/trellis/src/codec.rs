//! Mechanical name conversion at the codec boundary.
//!
//! Internal attribute and relation names use camelCase; backend field and
//! relation names use snake_case. The conversion is bidirectional and
//! applied automatically during parse/serialize and repository propagation.

use convert_case::{Case, Casing};

pub(crate) fn to_backend_name(internal: &str) -> String {
    internal.to_case(Case::Snake)
}

pub(crate) fn to_internal_name(backend: &str) -> String {
    backend.to_case(Case::Camel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_conversion() {
        assert_eq!(to_backend_name("pastOwners"), "past_owners");
        assert_eq!(to_internal_name("past_owners"), "pastOwners");
        assert_eq!(to_backend_name("bornAt"), "born_at");
        assert_eq!(to_internal_name("born_at"), "bornAt");
    }

    #[test]
    fn test_single_segment_names_are_stable() {
        assert_eq!(to_backend_name("kind"), "kind");
        assert_eq!(to_internal_name("kind"), "kind");
        assert_eq!(to_backend_name("id"), "id");
    }
}
