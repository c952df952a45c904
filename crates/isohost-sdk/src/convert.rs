//! Structural, name-based conversion between host and plugin representations.
//!
//! Both sides describe their types to the boundary through [`ToBoundary`] and
//! rebuild them through [`FromBoundary`]. Records are copied field by field
//! onto a default destination (see [`contract_record!`](crate::contract_record)),
//! collections element-wise, and enumerations by symbolic name with an
//! optional numeric fallback (see [`contract_enum!`](crate::contract_enum)).

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::value::BoundaryValue;

/// How an enum value whose name has no match on the destination side is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnumFallback {
    /// Fall back to the underlying numeric value.
    #[default]
    Numeric,
    /// Only symbolic names are accepted.
    Strict,
}

/// Options threaded through a conversion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConversionContext {
    pub enum_fallback: EnumFallback,
}

impl ConversionContext {
    pub fn strict() -> Self {
        Self {
            enum_fallback: EnumFallback::Strict,
        }
    }

    pub fn with_enum_fallback(mut self, fallback: EnumFallback) -> Self {
        self.enum_fallback = fallback;
        self
    }
}

/// Conversion failures. `path` locates the offending value inside the
/// converted one (`$` is the root).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConversionError {
    #[error("{type_name} at `{}`: expected {expected}, found {found}", display_path(.path))]
    TypeMismatch {
        type_name: String,
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("{type_name} at `{}`: value {value} out of range", display_path(.path))]
    OutOfRange {
        type_name: String,
        path: String,
        value: String,
    },

    #[error(
        "enum {type_name} at `{}`: no variant named `{name}`{}",
        display_path(.path),
        display_numeric(.value)
    )]
    UnmatchedEnum {
        type_name: String,
        path: String,
        name: String,
        value: Option<i64>,
    },
}

fn display_path(path: &str) -> String {
    if path.is_empty() {
        "$".to_string()
    } else if path.starts_with('[') {
        format!("${path}")
    } else {
        format!("$.{path}")
    }
}

fn display_numeric(value: &Option<i64>) -> String {
    match value {
        Some(v) => format!(" or valued {v}"),
        None => String::new(),
    }
}

impl ConversionError {
    pub fn mismatch(type_name: &str, expected: &'static str, found: &BoundaryValue) -> Self {
        Self::TypeMismatch {
            type_name: type_name.to_string(),
            path: String::new(),
            expected,
            found: found.kind(),
        }
    }

    /// Prefix the error's location with a record field name.
    pub fn within(self, field: &str) -> Self {
        self.prefixed(field.to_string())
    }

    /// Prefix the error's location with a list index.
    pub fn at_index(self, index: usize) -> Self {
        self.prefixed(format!("[{index}]"))
    }

    fn prefixed(mut self, segment: String) -> Self {
        let path = match &mut self {
            Self::TypeMismatch { path, .. }
            | Self::OutOfRange { path, .. }
            | Self::UnmatchedEnum { path, .. } => path,
        };
        *path = if path.is_empty() {
            segment
        } else if path.starts_with('[') {
            format!("{segment}{path}")
        } else {
            format!("{segment}.{path}")
        };
        self
    }

    pub fn path(&self) -> &str {
        match self {
            Self::TypeMismatch { path, .. }
            | Self::OutOfRange { path, .. }
            | Self::UnmatchedEnum { path, .. } => path,
        }
    }
}

/// Describe a value in boundary representation.
pub trait ToBoundary {
    fn to_boundary(&self) -> BoundaryValue;
}

/// Rebuild a value from boundary representation.
pub trait FromBoundary: Sized {
    fn from_boundary(value: BoundaryValue, cx: &ConversionContext) -> Result<Self, ConversionError>;
}

/// Convert any value into its boundary representation and back into `T`.
///
/// This is the host ⇄ plugin copy in one step, used when both
/// representations are visible in the same crate (tests, adapters).
pub fn convert<S, T>(value: &S, cx: &ConversionContext) -> Result<T, ConversionError>
where
    S: ToBoundary + ?Sized,
    T: FromBoundary,
{
    T::from_boundary(value.to_boundary(), cx)
}

// ============================================================================
// Enumerations
// ============================================================================

/// Enumerations that cross the boundary. Implemented by
/// [`contract_enum!`](crate::contract_enum).
pub trait ContractEnum: Copy + 'static {
    const TYPE_NAME: &'static str;
    const VARIANTS: &'static [(&'static str, i64, Self)];
}

fn variant_by_name<E: ContractEnum>(name: &str) -> Option<E> {
    E::VARIANTS
        .iter()
        .find(|(variant, _, _)| *variant == name)
        .map(|(_, _, v)| *v)
}

fn variant_by_value<E: ContractEnum>(value: i64) -> Option<E> {
    E::VARIANTS
        .iter()
        .find(|(_, discriminant, _)| *discriminant == value)
        .map(|(_, _, v)| *v)
}

/// Name first, numeric value second (unless the context is strict).
pub fn enum_from_boundary<E: ContractEnum>(
    value: BoundaryValue,
    cx: &ConversionContext,
) -> Result<E, ConversionError> {
    let unmatched = |name: String, value: Option<i64>| ConversionError::UnmatchedEnum {
        type_name: E::TYPE_NAME.to_string(),
        path: String::new(),
        name,
        value,
    };

    match value {
        BoundaryValue::Enum { name, value } => {
            if let Some(variant) = variant_by_name::<E>(&name) {
                return Ok(variant);
            }
            if cx.enum_fallback == EnumFallback::Numeric {
                if let Some(variant) = variant_by_value::<E>(value) {
                    tracing::warn!(
                        enum_type = E::TYPE_NAME,
                        name = %name,
                        value,
                        "enum variant matched by numeric value only"
                    );
                    return Ok(variant);
                }
            }
            Err(unmatched(name, Some(value)))
        }
        BoundaryValue::Str(name) => {
            variant_by_name::<E>(&name).ok_or_else(|| unmatched(name, None))
        }
        BoundaryValue::Int(value) if cx.enum_fallback == EnumFallback::Numeric => {
            variant_by_value::<E>(value).ok_or_else(|| unmatched(String::new(), Some(value)))
        }
        other => Err(ConversionError::mismatch(E::TYPE_NAME, "enum", &other)),
    }
}

// ============================================================================
// Primitive & collection impls
// ============================================================================

impl ToBoundary for BoundaryValue {
    fn to_boundary(&self) -> BoundaryValue {
        self.clone()
    }
}

impl FromBoundary for BoundaryValue {
    fn from_boundary(value: BoundaryValue, _cx: &ConversionContext) -> Result<Self, ConversionError> {
        Ok(value)
    }
}

impl<T: ToBoundary + ?Sized> ToBoundary for &T {
    fn to_boundary(&self) -> BoundaryValue {
        (**self).to_boundary()
    }
}

impl ToBoundary for () {
    fn to_boundary(&self) -> BoundaryValue {
        BoundaryValue::Null
    }
}

impl FromBoundary for () {
    fn from_boundary(value: BoundaryValue, _cx: &ConversionContext) -> Result<Self, ConversionError> {
        match value {
            BoundaryValue::Null => Ok(()),
            other => Err(ConversionError::mismatch("()", "null", &other)),
        }
    }
}

impl ToBoundary for bool {
    fn to_boundary(&self) -> BoundaryValue {
        BoundaryValue::Bool(*self)
    }
}

impl FromBoundary for bool {
    fn from_boundary(value: BoundaryValue, _cx: &ConversionContext) -> Result<Self, ConversionError> {
        match value {
            BoundaryValue::Bool(v) => Ok(v),
            other => Err(ConversionError::mismatch("bool", "bool", &other)),
        }
    }
}

fn out_of_range(type_name: &str, value: impl ToString) -> ConversionError {
    ConversionError::OutOfRange {
        type_name: type_name.to_string(),
        path: String::new(),
        value: value.to_string(),
    }
}

macro_rules! integer_from_boundary {
    ($($ty:ty),*) => {
        $(
            impl FromBoundary for $ty {
                fn from_boundary(
                    value: BoundaryValue,
                    _cx: &ConversionContext,
                ) -> Result<Self, ConversionError> {
                    match value {
                        BoundaryValue::Int(v) => {
                            <$ty>::try_from(v).map_err(|_| out_of_range(stringify!($ty), v))
                        }
                        BoundaryValue::UInt(v) => {
                            <$ty>::try_from(v).map_err(|_| out_of_range(stringify!($ty), v))
                        }
                        other => Err(ConversionError::mismatch(stringify!($ty), "int", &other)),
                    }
                }
            }
        )*
    };
}

integer_from_boundary!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

macro_rules! integer_to_boundary {
    ($($ty:ty => $wide:ty),*) => {
        $(
            impl ToBoundary for $ty {
                fn to_boundary(&self) -> BoundaryValue {
                    BoundaryValue::from(<$wide>::from(*self))
                }
            }
        )*
    };
}

integer_to_boundary!(i8 => i64, i16 => i64, i32 => i64, i64 => i64, u8 => i64, u16 => i64, u32 => i64, u64 => u64);

// Pointer-sized integers widen losslessly to 64 bits.
const _: () = assert!(usize::BITS <= u64::BITS);

impl ToBoundary for isize {
    fn to_boundary(&self) -> BoundaryValue {
        BoundaryValue::Int(*self as i64)
    }
}

impl ToBoundary for usize {
    fn to_boundary(&self) -> BoundaryValue {
        BoundaryValue::from(*self as u64)
    }
}

impl ToBoundary for f64 {
    fn to_boundary(&self) -> BoundaryValue {
        BoundaryValue::Float(*self)
    }
}

impl FromBoundary for f64 {
    fn from_boundary(value: BoundaryValue, _cx: &ConversionContext) -> Result<Self, ConversionError> {
        match value {
            BoundaryValue::Float(v) => Ok(v),
            other => Err(ConversionError::mismatch("f64", "float", &other)),
        }
    }
}

impl ToBoundary for f32 {
    fn to_boundary(&self) -> BoundaryValue {
        BoundaryValue::Float(f64::from(*self))
    }
}

impl FromBoundary for f32 {
    fn from_boundary(value: BoundaryValue, _cx: &ConversionContext) -> Result<Self, ConversionError> {
        match value {
            BoundaryValue::Float(v) => {
                let narrowed = v as f32;
                if v.is_finite() && !narrowed.is_finite() {
                    return Err(out_of_range("f32", v));
                }
                Ok(narrowed)
            }
            other => Err(ConversionError::mismatch("f32", "float", &other)),
        }
    }
}

impl ToBoundary for str {
    fn to_boundary(&self) -> BoundaryValue {
        BoundaryValue::Str(self.to_string())
    }
}

impl ToBoundary for String {
    fn to_boundary(&self) -> BoundaryValue {
        BoundaryValue::Str(self.clone())
    }
}

impl FromBoundary for String {
    fn from_boundary(value: BoundaryValue, _cx: &ConversionContext) -> Result<Self, ConversionError> {
        match value {
            BoundaryValue::Str(v) => Ok(v),
            other => Err(ConversionError::mismatch("String", "string", &other)),
        }
    }
}

impl<T: ToBoundary> ToBoundary for Option<T> {
    fn to_boundary(&self) -> BoundaryValue {
        match self {
            Some(v) => v.to_boundary(),
            None => BoundaryValue::Null,
        }
    }
}

impl<T: FromBoundary> FromBoundary for Option<T> {
    fn from_boundary(value: BoundaryValue, cx: &ConversionContext) -> Result<Self, ConversionError> {
        match value {
            BoundaryValue::Null => Ok(None),
            other => T::from_boundary(other, cx).map(Some),
        }
    }
}

impl<T: ToBoundary> ToBoundary for [T] {
    fn to_boundary(&self) -> BoundaryValue {
        BoundaryValue::List(self.iter().map(ToBoundary::to_boundary).collect())
    }
}

impl<T: ToBoundary> ToBoundary for Vec<T> {
    fn to_boundary(&self) -> BoundaryValue {
        self.as_slice().to_boundary()
    }
}

impl<T: FromBoundary> FromBoundary for Vec<T> {
    fn from_boundary(value: BoundaryValue, cx: &ConversionContext) -> Result<Self, ConversionError> {
        match value {
            BoundaryValue::List(items) => items
                .into_iter()
                .enumerate()
                .map(|(index, item)| T::from_boundary(item, cx).map_err(|e| e.at_index(index)))
                .collect(),
            other => Err(ConversionError::mismatch("Vec", "list", &other)),
        }
    }
}

impl<T: ToBoundary> ToBoundary for BTreeMap<String, T> {
    fn to_boundary(&self) -> BoundaryValue {
        BoundaryValue::Record(
            self.iter()
                .map(|(k, v)| (k.clone(), v.to_boundary()))
                .collect(),
        )
    }
}

impl<T: FromBoundary> FromBoundary for BTreeMap<String, T> {
    fn from_boundary(value: BoundaryValue, cx: &ConversionContext) -> Result<Self, ConversionError> {
        match value {
            BoundaryValue::Record(fields) => fields
                .into_iter()
                .map(|(k, v)| {
                    let converted = T::from_boundary(v, cx).map_err(|e| e.within(&k))?;
                    Ok((k, converted))
                })
                .collect(),
            other => Err(ConversionError::mismatch("BTreeMap", "record", &other)),
        }
    }
}

impl<T: ToBoundary> ToBoundary for HashMap<String, T> {
    fn to_boundary(&self) -> BoundaryValue {
        BoundaryValue::Record(
            self.iter()
                .map(|(k, v)| (k.clone(), v.to_boundary()))
                .collect(),
        )
    }
}

impl<T: FromBoundary> FromBoundary for HashMap<String, T> {
    fn from_boundary(value: BoundaryValue, cx: &ConversionContext) -> Result<Self, ConversionError> {
        BTreeMap::<String, T>::from_boundary(value, cx)
            .map(|map| map.into_iter().collect())
            .map_err(|e| match e {
                ConversionError::TypeMismatch {
                    path,
                    expected,
                    found,
                    ..
                } if path.is_empty() => ConversionError::TypeMismatch {
                    type_name: "HashMap".to_string(),
                    path,
                    expected,
                    found,
                },
                other => other,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    crate::contract_record! {
        #[derive(Debug, Clone, PartialEq)]
        struct HostName {
            text: String,
            tags: Vec<String>,
            legacy: i32,
        }
    }

    crate::contract_record! {
        #[derive(Debug, Clone, PartialEq)]
        struct PluginName {
            text: String,
            tags: Vec<String>,
            extra: Option<String>,
        }
    }

    crate::contract_record! {
        #[derive(Debug, Clone, PartialEq)]
        struct MistypedName {
            text: i64,
        }
    }

    crate::contract_enum! {
        #[derive(Debug, PartialEq, Eq)]
        enum HostShade {
            Red = 1,
            Green = 2,
            Blue = 3,
        }
    }

    crate::contract_enum! {
        #[derive(Debug, PartialEq, Eq)]
        enum PluginShade {
            Green = 1,
            Red = 2,
            Violet = 3,
            Ochre = 9,
        }
    }

    #[test]
    fn test_record_copies_matching_fields() {
        let source = PluginName {
            text: "ok".to_string(),
            tags: vec!["a".to_string(), "b".to_string()],
            extra: Some("dropped".to_string()),
        };
        let host: HostName = convert(&source, &ConversionContext::default()).unwrap();
        assert_eq!(host.text, "ok");
        assert_eq!(host.tags, vec!["a", "b"]);
        // destination-only field keeps its default
        assert_eq!(host.legacy, 0);
    }

    #[test]
    fn test_record_field_type_mismatch_is_error() {
        let source = PluginName {
            text: "ok".to_string(),
            ..Default::default()
        };
        let err = convert::<_, MistypedName>(&source, &ConversionContext::default()).unwrap_err();
        match &err {
            ConversionError::TypeMismatch {
                expected, found, ..
            } => {
                assert_eq!(*expected, "int");
                assert_eq!(*found, "string");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.path(), "text");
        assert!(err.to_string().contains("$.text"));
    }

    #[test]
    fn test_record_from_non_record_is_error() {
        let err = HostName::from_boundary(BoundaryValue::Int(1), &ConversionContext::default())
            .unwrap_err();
        assert!(matches!(err, ConversionError::TypeMismatch { expected: "record", .. }));
    }

    #[test]
    fn test_list_error_carries_index() {
        let value = BoundaryValue::List(vec![
            BoundaryValue::Str("a".to_string()),
            BoundaryValue::Int(2),
        ]);
        let err = Vec::<String>::from_boundary(value, &ConversionContext::default()).unwrap_err();
        assert_eq!(err.path(), "[1]");
    }

    #[test]
    fn test_nested_path() {
        let value = BoundaryValue::record()
            .field(
                "tags",
                BoundaryValue::List(vec![BoundaryValue::Bool(true)]),
            )
            .build();
        let err = HostName::from_boundary(value, &ConversionContext::default()).unwrap_err();
        assert_eq!(err.path(), "tags[0]");
    }

    #[test]
    fn test_integer_range_checked() {
        let err = u8::from_boundary(BoundaryValue::Int(300), &ConversionContext::default())
            .unwrap_err();
        assert!(matches!(err, ConversionError::OutOfRange { .. }));
        assert_eq!(
            i32::from_boundary(BoundaryValue::Int(-5), &ConversionContext::default()).unwrap(),
            -5
        );
    }

    #[test]
    fn test_wide_unsigned_is_lossless() {
        let cx = ConversionContext::default();
        assert_eq!(u64::MAX.to_boundary(), BoundaryValue::UInt(u64::MAX));
        assert_eq!(convert::<_, u64>(&u64::MAX, &cx).unwrap(), u64::MAX);
        assert_eq!(convert::<_, usize>(&usize::MAX, &cx).unwrap(), usize::MAX);
        assert_eq!(convert::<_, u64>(&(i64::MAX as u64), &cx).unwrap(), i64::MAX as u64);

        let err = convert::<_, i64>(&u64::MAX, &cx).unwrap_err();
        match err {
            ConversionError::OutOfRange { type_name, value, .. } => {
                assert_eq!(type_name, "i64");
                assert_eq!(value, u64::MAX.to_string());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_negative_into_unsigned_is_error() {
        let cx = ConversionContext::default();
        assert!(matches!(
            convert::<_, u64>(&-1i64, &cx),
            Err(ConversionError::OutOfRange { .. })
        ));
        assert!(matches!(
            convert::<_, usize>(&isize::MIN, &cx),
            Err(ConversionError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_f32_narrowing() {
        let cx = ConversionContext::default();
        let err = f32::from_boundary(BoundaryValue::Float(1.0e300), &cx).unwrap_err();
        assert!(matches!(err, ConversionError::OutOfRange { .. }));
        assert_eq!(f32::from_boundary(BoundaryValue::Float(0.5), &cx).unwrap(), 0.5);
        assert!(f32::from_boundary(BoundaryValue::Float(f64::INFINITY), &cx)
            .unwrap()
            .is_infinite());
        assert!(f32::from_boundary(BoundaryValue::Float(f64::NAN), &cx).unwrap().is_nan());
    }

    #[test]
    fn test_no_int_to_float_coercion() {
        assert!(f64::from_boundary(BoundaryValue::Int(1), &ConversionContext::default()).is_err());
    }

    #[test]
    fn test_enum_name_takes_precedence_over_value() {
        // PluginShade::Red has value 2, which is HostShade::Green's value
        let host: HostShade = convert(&PluginShade::Red, &ConversionContext::default()).unwrap();
        assert_eq!(host, HostShade::Red);
    }

    #[test]
    fn test_enum_numeric_fallback() {
        let host: HostShade = convert(&PluginShade::Violet, &ConversionContext::default()).unwrap();
        assert_eq!(host, HostShade::Blue);
    }

    #[test]
    fn test_enum_strict_rejects_numeric_fallback() {
        let err = convert::<_, HostShade>(&PluginShade::Violet, &ConversionContext::strict())
            .unwrap_err();
        assert!(matches!(err, ConversionError::UnmatchedEnum { .. }));
    }

    #[test]
    fn test_enum_unmatched() {
        let err = convert::<_, HostShade>(&PluginShade::Ochre, &ConversionContext::default())
            .unwrap_err();
        match err {
            ConversionError::UnmatchedEnum { name, value, .. } => {
                assert_eq!(name, "Ochre");
                assert_eq!(value, Some(9));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_enum_from_plain_name() {
        let host = HostShade::from_boundary(
            BoundaryValue::Str("Green".to_string()),
            &ConversionContext::default(),
        )
        .unwrap();
        assert_eq!(host, HostShade::Green);
    }

    #[test]
    fn test_option_and_null() {
        let none: Option<String> =
            Option::from_boundary(BoundaryValue::Null, &ConversionContext::default()).unwrap();
        assert!(none.is_none());
        assert!(String::from_boundary(BoundaryValue::Null, &ConversionContext::default()).is_err());
    }

    #[test]
    fn test_map_round_trip() {
        let mut map = HashMap::new();
        map.insert("a".to_string(), 1i64);
        map.insert("b".to_string(), 2i64);
        let back: HashMap<String, i64> = convert(&map, &ConversionContext::default()).unwrap();
        assert_eq!(back, map);
    }
}
