//! Fixed-ordinal enumerations
//!
//! Callers of the server depend on the integer value of many enumerations, so
//! every public enum is declared through [`ordinal_enum!`], which pins the
//! discriminant and generates lossless conversions from and to `i32`.

/// Declares a `#[repr(i32)]` enum with explicit ordinals plus `ordinal()`,
/// `from_ordinal()`, `ALL` and a `TryFrom<i32>` implementation.
///
/// ```rust,ignore
/// vesper_core::ordinal_enum! {
///     pub enum PrimitiveType {
///         Points = 0,
///         Lines = 1,
///     }
/// }
/// assert_eq!(PrimitiveType::from_ordinal(1), Some(PrimitiveType::Lines));
/// ```
#[macro_export]
macro_rules! ordinal_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $value:expr ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(i32)]
        $vis enum $name {
            $( $(#[$vmeta])* $variant = $value ),+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Integer value of this variant.
            #[inline]
            #[must_use]
            pub const fn ordinal(self) -> i32 {
                self as i32
            }

            /// Variant with the given integer value.
            #[must_use]
            pub fn from_ordinal(value: i32) -> Option<Self> {
                match value {
                    $( v if v == $value => Some($name::$variant), )+
                    _ => None,
                }
            }
        }

        impl TryFrom<i32> for $name {
            type Error = $crate::errors::ServerError;

            fn try_from(value: i32) -> ::core::result::Result<Self, Self::Error> {
                Self::from_ordinal(value).ok_or_else(|| {
                    $crate::errors::ServerError::InvalidArgument(format!(
                        "{} is not a valid {}",
                        value,
                        stringify!($name)
                    ))
                })
            }
        }

        impl From<$name> for i32 {
            fn from(value: $name) -> i32 {
                value.ordinal()
            }
        }
    };
}

#[cfg(test)]
mod tests {
    crate::ordinal_enum! {
        #[derive(Default)]
        enum Sample {
            #[default]
            Zero = 0,
            Two = 2,
            Big = 1 << 4,
        }
    }

    #[test]
    fn ordinals_are_pinned() {
        assert_eq!(Sample::Zero.ordinal(), 0);
        assert_eq!(Sample::Two.ordinal(), 2);
        assert_eq!(Sample::Big.ordinal(), 16);
        assert_eq!(Sample::from_ordinal(16), Some(Sample::Big));
        assert_eq!(Sample::from_ordinal(1), None);
        assert_eq!(Sample::ALL.len(), 3);
        assert_eq!(Sample::default(), Sample::Zero);
    }

    #[test]
    fn try_from_reports_invalid_values() {
        assert!(Sample::try_from(3).is_err());
        assert_eq!(Sample::try_from(2).ok(), Some(Sample::Two));
    }
}
