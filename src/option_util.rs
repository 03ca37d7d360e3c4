use serde::{Deserialize, Serialize};

/// A config value that may be absent, null, a single item, or a list.
#[derive(Default, Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum NoneOrSome<T> {
    #[serde(skip_deserializing)]
    #[default]
    Unspecified,
    None,
    One(T),
    Some(Vec<T>),
}

impl<T> NoneOrSome<T> {
    pub fn is_unspecified(&self) -> bool {
        matches!(self, NoneOrSome::Unspecified)
    }

    pub fn len(&self) -> usize {
        match self {
            NoneOrSome::Unspecified => 0,
            NoneOrSome::None => 0,
            NoneOrSome::One(_) => 1,
            NoneOrSome::Some(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_vec(self) -> Vec<T> {
        match self {
            NoneOrSome::Unspecified | NoneOrSome::None => vec![],
            NoneOrSome::One(item) => vec![item],
            NoneOrSome::Some(v) => v,
        }
    }
}

impl<T> From<Vec<T>> for NoneOrSome<T> {
    fn from(mut v: Vec<T>) -> Self {
        match v.len() {
            0 => NoneOrSome::None,
            1 => match v.pop() {
                Some(item) => NoneOrSome::One(item),
                None => NoneOrSome::None,
            },
            _ => NoneOrSome::Some(v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Holder {
        #[serde(default)]
        value: NoneOrSome<String>,
    }

    #[test]
    fn test_deserialize_variants() {
        let h: Holder = serde_yaml::from_str("{}").unwrap();
        assert!(h.value.is_unspecified());

        let h: Holder = serde_yaml::from_str("value: null").unwrap();
        assert_eq!(h.value, NoneOrSome::None);

        let h: Holder = serde_yaml::from_str("value: a.example").unwrap();
        assert_eq!(h.value.into_vec(), vec!["a.example"]);

        let h: Holder = serde_yaml::from_str("value: [a.example, b.example:8443]").unwrap();
        assert_eq!(h.value.len(), 2);
    }

    #[test]
    fn test_from_vec() {
        assert_eq!(NoneOrSome::<u8>::from(vec![]), NoneOrSome::None);
        assert_eq!(NoneOrSome::from(vec![1]), NoneOrSome::One(1));
        assert_eq!(NoneOrSome::from(vec![1, 2]), NoneOrSome::Some(vec![1, 2]));
    }
}
