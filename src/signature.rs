// Operand signatures for remapper operators
// Fixes the operand shape of every tag in the closed operator set

use thiserror::Error;

/// Signature validation errors
#[derive(Error, Debug, PartialEq)]
pub enum SignatureError {
    #[error("expected {expected}, got {actual}")]
    ShapeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("missing required key '{0}'")]
    MissingKey(String),

    #[error("unexpected key '{0}'")]
    UnexpectedKey(String),

    #[error("expected {expected} entries, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// A field of a structured record operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub optional: bool,
}

const fn required(name: &'static str) -> Field {
    Field {
        name,
        optional: false,
    }
}

const fn optional(name: &'static str) -> Field {
    Field {
        name,
        optional: true,
    }
}

/// Shape of an operator operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandShape {
    /// A single nested remapper.
    Node,
    /// A single nested remapper or null.
    OptionalNode,
    /// An ordered list of remappers.
    NodeList,
    /// An ordered list of exactly two remappers.
    NodePair,
    /// A map of output keys to remappers.
    NodeMap,
    /// A record with named fields.
    Record(&'static [Field]),
    /// A list of records with named fields.
    RecordList(&'static [Field]),
    /// A plain literal argument, decoded by the parser per operator.
    Argument,
}

/// Operator signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub tag: &'static str,
    pub shape: OperandShape,
}

const IF_FIELDS: &[Field] = &[required("condition"), required("then"), required("else")];
const MATCH_FIELDS: &[Field] = &[required("case"), required("value")];
const FORMAT_FIELDS: &[Field] = &[
    optional("messageId"),
    optional("template"),
    optional("values"),
];
const HISTORY_PROPS_FIELDS: &[Field] = &[required("index"), required("props")];
const HISTORY_OMIT_FIELDS: &[Field] = &[required("index"), required("keys")];
const RANDOM_STRING_FIELDS: &[Field] = &[required("choice"), required("length")];
const ICS_FIELDS: &[Field] = &[
    required("start"),
    optional("end"),
    optional("duration"),
    required("title"),
    optional("description"),
    optional("url"),
    optional("location"),
    optional("coordinates"),
];

/// Every operator tag and its operand shape.
pub const OPERATORS: &[Signature] = &[
    sig("prop", OperandShape::Argument),
    sig("static", OperandShape::Argument),
    sig("object.from", OperandShape::NodeMap),
    sig("object.assign", OperandShape::NodeMap),
    sig("object.omit", OperandShape::Argument),
    sig("array.map", OperandShape::Node),
    sig("array.from", OperandShape::NodeList),
    sig("array.append", OperandShape::NodeList),
    sig("array.omit", OperandShape::NodeList),
    sig("array.unique", OperandShape::OptionalNode),
    sig("if", OperandShape::Record(IF_FIELDS)),
    sig("match", OperandShape::RecordList(MATCH_FIELDS)),
    sig("equals", OperandShape::NodeList),
    sig("gt", OperandShape::NodePair),
    sig("lt", OperandShape::NodePair),
    sig("string.format", OperandShape::Record(FORMAT_FIELDS)),
    sig("string.replace", OperandShape::Argument),
    sig("string.case", OperandShape::Argument),
    sig("translate", OperandShape::Argument),
    sig("date.now", OperandShape::Argument),
    sig("date.add", OperandShape::Argument),
    sig("date.parse", OperandShape::Argument),
    sig("date.format", OperandShape::Argument),
    sig("random.choice", OperandShape::Argument),
    sig("random.integer", OperandShape::Argument),
    sig("random.float", OperandShape::Argument),
    sig("random.string", OperandShape::Record(RANDOM_STRING_FIELDS)),
    sig("context", OperandShape::Argument),
    sig("root", OperandShape::Argument),
    sig("history", OperandShape::Argument),
    sig("from.history", OperandShape::Record(HISTORY_PROPS_FIELDS)),
    sig("assign.history", OperandShape::Record(HISTORY_PROPS_FIELDS)),
    sig("omit.history", OperandShape::Record(HISTORY_OMIT_FIELDS)),
    sig("app", OperandShape::Argument),
    sig("page", OperandShape::Argument),
    sig("user", OperandShape::Argument),
    sig("array", OperandShape::Argument),
    sig("step", OperandShape::Argument),
    sig("null.strip", OperandShape::Argument),
    sig("ics", OperandShape::Record(ICS_FIELDS)),
    sig("log", OperandShape::Argument),
];

const fn sig(tag: &'static str, shape: OperandShape) -> Signature {
    Signature { tag, shape }
}

/// Look up the signature of an operator tag.
pub fn lookup(tag: &str) -> Option<&'static Signature> {
    OPERATORS.iter().find(|s| s.tag == tag)
}

impl Signature {
    /// Fields of a record-shaped operand, if any.
    pub fn fields(&self) -> &'static [Field] {
        match self.shape {
            OperandShape::Record(fields) | OperandShape::RecordList(fields) => fields,
            _ => &[],
        }
    }

    /// Validate the key set of a record operand against this signature.
    ///
    /// Every required field must be present and no unknown key is allowed.
    pub fn validate_record_keys<'k>(
        &self,
        keys: impl IntoIterator<Item = &'k str>,
    ) -> Result<(), SignatureError> {
        let fields = self.fields();
        let keys: Vec<&str> = keys.into_iter().collect();

        if let Some(unknown) = keys
            .iter()
            .find(|k| !fields.iter().any(|f| f.name == **k))
        {
            return Err(SignatureError::UnexpectedKey(unknown.to_string()));
        }

        if let Some(missing) = fields
            .iter()
            .find(|f| !f.optional && !keys.contains(&f.name))
        {
            return Err(SignatureError::MissingKey(missing.name.to_string()));
        }

        Ok(())
    }

    /// Validate the length of a list operand.
    pub fn validate_list_len(&self, actual: usize) -> Result<(), SignatureError> {
        match self.shape {
            OperandShape::NodePair if actual != 2 => Err(SignatureError::LengthMismatch {
                expected: 2,
                actual,
            }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_tag_is_unique() {
        for (i, a) in OPERATORS.iter().enumerate() {
            for b in &OPERATORS[i + 1..] {
                assert_ne!(a.tag, b.tag);
            }
        }
    }

    #[test]
    fn test_lookup() {
        assert_eq!(lookup("array.map").map(|s| s.shape), Some(OperandShape::Node));
        assert!(lookup("array.flatten").is_none());
    }

    #[test]
    fn test_record_validation() {
        let sig = lookup("if").unwrap();

        assert!(sig.validate_record_keys(["condition", "then", "else"]).is_ok());

        assert_eq!(
            sig.validate_record_keys(["then", "else"]),
            Err(SignatureError::MissingKey("condition".to_string()))
        );

        assert_eq!(
            sig.validate_record_keys(["condition", "then", "else", "otherwise"]),
            Err(SignatureError::UnexpectedKey("otherwise".to_string()))
        );
    }

    #[test]
    fn test_optional_fields() {
        let sig = lookup("string.format").unwrap();
        assert!(sig.validate_record_keys([]).is_ok());
        assert!(sig.validate_record_keys(["template"]).is_ok());
    }

    #[test]
    fn test_pair_length() {
        let sig = lookup("gt").unwrap();
        assert!(sig.validate_list_len(2).is_ok());
        assert!(sig.validate_list_len(3).is_err());
        assert!(lookup("equals").unwrap().validate_list_len(5).is_ok());
    }
}
