use std::collections::{BTreeSet, HashMap};

/// Label recorded for a missing categorical value, so absent values encode to
/// a stable index of their own.
pub const MISSING_LABEL: &str = "nan";

/// Dense integer encoding of a categorical column, fitted once on the observed
/// values. Indices follow the sorted order of the distinct labels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryEncoder {
    labels: Vec<String>,
    index: HashMap<String, u32>,
}

impl CategoryEncoder {
    pub fn fit<'a, I>(values: I) -> Self
    where
        I: IntoIterator<Item = Option<&'a str>>,
    {
        let labels: Vec<String> = values
            .into_iter()
            .map(|v| v.unwrap_or(MISSING_LABEL).to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let index = labels
            .iter()
            .enumerate()
            .map(|(i, label)| (label.clone(), i as u32))
            .collect();
        Self { labels, index }
    }

    /// Fits on `values` and returns the code of each value, in input order.
    pub fn fit_transform<'a, I>(values: I) -> (Self, Vec<u32>)
    where
        I: IntoIterator<Item = Option<&'a str>>,
        I::IntoIter: Clone,
    {
        let values = values.into_iter();
        let encoder = Self::fit(values.clone());
        let codes = values
            .map(|v| encoder.index[v.unwrap_or(MISSING_LABEL)])
            .collect();
        (encoder, codes)
    }

    /// `None` for labels never seen while fitting.
    pub fn encode(&self, value: Option<&str>) -> Option<u32> {
        self.index.get(value.unwrap_or(MISSING_LABEL)).copied()
    }

    pub fn decode(&self, code: u32) -> Option<&str> {
        self.labels.get(code as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Every encoder fitted while building a feature table. They are only ever
/// built together with the table they describe.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureEncoders {
    pub route_name: CategoryEncoder,
    pub mode: CategoryEncoder,
    pub prev_stop: CategoryEncoder,
    pub next_stop: CategoryEncoder,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_sorted_label_order() {
        let encoder =
            CategoryEncoder::fit([Some("Train"), Some("Bus"), Some("Train"), Some("Ferry")]);
        assert_eq!(encoder.len(), 3);
        assert_eq!(encoder.encode(Some("Bus")), Some(0));
        assert_eq!(encoder.encode(Some("Ferry")), Some(1));
        assert_eq!(encoder.encode(Some("Train")), Some(2));
        assert_eq!(encoder.decode(2), Some("Train"));
    }

    #[test]
    fn missing_values_share_one_code() {
        let encoder = CategoryEncoder::fit([Some("1001"), None, Some("1002"), None]);
        assert_eq!(encoder.len(), 3);
        assert_eq!(encoder.encode(None), encoder.encode(Some(MISSING_LABEL)));
        assert!(encoder.encode(None).is_some());
    }

    #[test]
    fn fit_transform_codes_every_input() {
        let (encoder, codes) =
            CategoryEncoder::fit_transform([Some("b"), None, Some("a"), Some("b")]);
        assert_eq!(codes, vec![1, 2, 0, 1]);
        assert_eq!(encoder.decode(codes[1]), Some(MISSING_LABEL));
    }

    #[test]
    fn unseen_labels_have_no_code() {
        let encoder = CategoryEncoder::fit([Some("Bus")]);
        assert_eq!(encoder.encode(Some("Tram")), None);
        assert_eq!(encoder.decode(7), None);
    }
}
