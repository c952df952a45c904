//! Declarative macros for contract types and plugin modules.

/// Declare a record that crosses the boundary by field name.
///
/// The struct gets `#[derive(Default)]` plus [`ToBoundary`](crate::ToBoundary)
/// and [`FromBoundary`](crate::FromBoundary) impls. Conversion starts from
/// `Default::default()` and overwrites each field present in the incoming
/// record. Incoming fields the struct does not declare are ignored; a `Null`
/// leaves the field at its default.
///
/// # Example
///
/// ```rust
/// use isohost_sdk::prelude::*;
///
/// contract_record! {
///     #[derive(Debug, Clone, PartialEq)]
///     pub struct Name {
///         pub text: String,
///     }
/// }
///
/// let value = Name { text: "ok".into() }.to_boundary();
/// let back = Name::from_boundary(value, &ConversionContext::default()).unwrap();
/// assert_eq!(back.text, "ok");
/// ```
#[macro_export]
macro_rules! contract_record {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$fmeta:meta])*
                $fvis:vis $field:ident : $ty:ty
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Default)]
        $vis struct $name {
            $(
                $(#[$fmeta])*
                $fvis $field: $ty,
            )*
        }

        impl $crate::ToBoundary for $name {
            fn to_boundary(&self) -> $crate::BoundaryValue {
                #[allow(unused_mut)]
                let mut fields = ::std::collections::BTreeMap::new();
                $(
                    fields.insert(
                        ::std::string::String::from(stringify!($field)),
                        $crate::ToBoundary::to_boundary(&self.$field),
                    );
                )*
                $crate::BoundaryValue::Record(fields)
            }
        }

        impl $crate::FromBoundary for $name {
            fn from_boundary(
                value: $crate::BoundaryValue,
                cx: &$crate::ConversionContext,
            ) -> ::std::result::Result<Self, $crate::ConversionError> {
                match value {
                    #[allow(unused_mut, unused_variables)]
                    $crate::BoundaryValue::Record(mut fields) => {
                        #[allow(unused_mut)]
                        let mut out = <Self as ::std::default::Default>::default();
                        $(
                            if let Some(v) = fields.remove(stringify!($field)) {
                                if !v.is_null() {
                                    out.$field = <$ty as $crate::FromBoundary>::from_boundary(v, cx)
                                        .map_err(|e| e.within(stringify!($field)))?;
                                }
                            }
                        )*
                        Ok(out)
                    }
                    other => Err($crate::ConversionError::mismatch(
                        stringify!($name),
                        "record",
                        &other,
                    )),
                }
            }
        }
    };
}

/// Declare a fieldless enum that crosses the boundary by variant name,
/// falling back to the explicit discriminant.
///
/// Every variant needs an explicit discriminant. The enum gets
/// `#[derive(Clone, Copy)]` and a [`ContractEnum`](crate::ContractEnum) impl.
#[macro_export]
macro_rules! contract_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $(
                $(#[$vmeta:meta])*
                $variant:ident = $value:expr
            ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy)]
        $vis enum $name {
            $(
                $(#[$vmeta])*
                $variant = $value,
            )+
        }

        impl $crate::ContractEnum for $name {
            const TYPE_NAME: &'static str = stringify!($name);
            const VARIANTS: &'static [(&'static str, i64, Self)] = &[
                $( (stringify!($variant), $value, $name::$variant), )+
            ];
        }

        impl $crate::ToBoundary for $name {
            fn to_boundary(&self) -> $crate::BoundaryValue {
                let name = match self {
                    $( $name::$variant => stringify!($variant), )+
                };
                $crate::BoundaryValue::Enum {
                    name: ::std::string::String::from(name),
                    value: *self as i64,
                }
            }
        }

        impl $crate::FromBoundary for $name {
            fn from_boundary(
                value: $crate::BoundaryValue,
                cx: &$crate::ConversionContext,
            ) -> ::std::result::Result<Self, $crate::ConversionError> {
                $crate::enum_from_boundary::<$name>(value, cx)
            }
        }
    };
}

/// Build an argument list for a proxy call. Arguments must be `Sync`.
///
/// `proxy.call::<Name>("Rename", args![name, 3u32])`
#[macro_export]
macro_rules! args {
    () => {
        &[] as &[&(dyn $crate::ToBoundary + Sync)]
    };
    ($($arg:expr),+ $(,)?) => {
        &[$( &$arg as &(dyn $crate::ToBoundary + Sync) ),+]
    };
}

/// Export a [`ModuleImage`](crate::ModuleImage) from a native plugin library.
///
/// Expands to the `isohost_module_v2` entry point that the host's native
/// backend resolves. The expression is evaluated once, on first use.
///
/// ```rust,ignore
/// isohost_sdk::export_module!(isohost_sdk::ModuleImage::new(manifest())
///     .with_factory("PluginA.WidgetImpl", |_| Ok(Box::new(WidgetImpl))));
/// ```
#[macro_export]
macro_rules! export_module {
    ($image:expr) => {
        #[no_mangle]
        pub extern "C" fn isohost_module_v2() -> *const $crate::native::NativeModuleVTable {
            static EXPORT: $crate::native::ModuleExport = $crate::native::ModuleExport::new();
            EXPORT.vtable(|| $image)
        }
    };
}
