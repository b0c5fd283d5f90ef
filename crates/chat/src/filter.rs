//! OData filter expressions for the search index.

/// Filter on entity, document type and year.
///
/// Renders as
/// `search.in(entity, 'A', ',') and search.in(document_type, 'x,y', ',') and (year eq 2022 or year eq 2023)`
/// with the optional clauses left out when empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilter {
    entity: String,
    document_types: Vec<String>,
    years: Vec<String>,
}

impl SearchFilter {
    pub fn for_entity(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            ..Self::default()
        }
    }

    /// Restrict to these document types. An empty list or a lone `All`
    /// means no restriction.
    pub fn document_types(mut self, types: &[String]) -> Self {
        self.document_types = types.to_vec();
        self
    }

    /// Restrict to any of these years. Non-numeric values are dropped.
    pub fn years(mut self, years: &[String]) -> Self {
        self.years = years
            .iter()
            .map(|y| y.trim())
            .filter(|y| !y.is_empty() && y.chars().all(|c| c.is_ascii_digit()))
            .map(str::to_string)
            .collect();
        self
    }

    pub fn render(&self) -> String {
        let mut filter = format!("search.in(entity, '{}', ',')", escape(&self.entity));

        let types = self.document_types.join(",");
        if !types.is_empty() && types != "All" {
            filter.push_str(&format!(" and search.in(document_type, '{}', ',')", escape(&types)));
        }

        if !self.years.is_empty() {
            filter.push_str(&format!(" and (year eq {})", self.years.join(" or year eq ")));
        }

        filter
    }
}

impl std::fmt::Display for SearchFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

/// OData string literals escape a single quote by doubling it.
fn escape(s: &str) -> String {
    s.replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn entity_only() {
        assert_eq!(
            SearchFilter::for_entity("Contoso").render(),
            "search.in(entity, 'Contoso', ',')"
        );
    }

    #[test]
    fn all_clauses() {
        let f = SearchFilter::for_entity("Contoso")
            .document_types(&strings(&["Annual Report", "Interim"]))
            .years(&strings(&["2022", "2023"]));
        assert_eq!(
            f.to_string(),
            "search.in(entity, 'Contoso', ',') and search.in(document_type, 'Annual Report,Interim', ',') and (year eq 2022 or year eq 2023)"
        );
    }

    #[test]
    fn all_document_types_means_no_clause() {
        let f = SearchFilter::for_entity("A").document_types(&strings(&["All"]));
        assert_eq!(f.render(), "search.in(entity, 'A', ',')");
    }

    #[test]
    fn quotes_are_escaped() {
        let f = SearchFilter::for_entity("O'Brien & Sons");
        assert_eq!(f.render(), "search.in(entity, 'O''Brien & Sons', ',')");
    }

    #[test]
    fn non_numeric_years_dropped() {
        let f = SearchFilter::for_entity("A").years(&strings(&["2021", "1=1) or (true", " "]));
        assert_eq!(f.render(), "search.in(entity, 'A', ',') and (year eq 2021)");
    }
}
