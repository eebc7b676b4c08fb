//! Declarations of the flag and enum types whose values mirror the Vulkan headers.

/// Declares a copyable set of flags. The value of each flag is the one of the flag of the
/// given `ash::vk` type, so that the sets can be compared with what an application passes to
/// Vulkan.
macro_rules! vulkan_bitflags {
    {
        $(#[doc = $ty_doc:literal])*
        $ty:ident
        $( impl { $($impls:item)* } )?
        = $ty_ffi:ident($repr:ty);

        $(
            $(#[doc = $flag_doc:literal])*
            $flag_name:ident = $flag_name_ffi:ident,
        )+
    } => {
        $(#[doc = $ty_doc])*
        #[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
        pub struct $ty($repr);

        impl $ty {
            $(
                $(#[doc = $flag_doc])*
                pub const $flag_name: Self = Self(ash::vk::$ty_ffi::$flag_name_ffi.as_raw());
            )+

            // Declaration order, used for iteration and formatting.
            const NAMED: &'static [(Self, &'static str)] = &[
                $( (Self::$flag_name, stringify!($flag_name)), )+
            ];

            /// Returns the empty set.
            #[inline]
            pub const fn empty() -> Self {
                Self(0)
            }

            /// Returns the set of every declared flag.
            #[inline]
            pub const fn all() -> Self {
                Self(0 $( | Self::$flag_name.0 )+)
            }

            #[inline]
            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            /// Returns whether `self` and `other` have a flag in common.
            #[inline]
            pub const fn intersects(self, other: Self) -> bool {
                self.0 & other.0 != 0
            }

            /// Returns whether every flag of `other` is in `self`.
            #[inline]
            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            #[inline]
            pub const fn union(self, other: Self) -> Self {
                Self(self.0 | other.0)
            }

            #[inline]
            pub const fn intersection(self, other: Self) -> Self {
                Self(self.0 & other.0)
            }

            #[inline]
            pub const fn difference(self, other: Self) -> Self {
                Self(self.0 & !other.0)
            }

            /// Returns the declared flags contained in `self`, in declaration order. A flag that
            /// stands for a group is yielded along with the members of the group.
            pub fn iter(self) -> impl Iterator<Item = Self> {
                Self::NAMED
                    .iter()
                    .map(|&(flag, _)| flag)
                    .filter(move |&flag| !flag.is_empty() && self.contains(flag))
            }

            $( $($impls)* )?
        }

        impl std::fmt::Debug for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let mut names = Self::NAMED
                    .iter()
                    .filter(|&&(flag, _)| !flag.is_empty() && self.contains(flag))
                    .map(|&(_, name)| name);

                let Some(first) = names.next() else {
                    return f.write_str("empty()");
                };

                f.write_str(first)?;

                for name in names {
                    write!(f, " | {}", name)?;
                }

                Ok(())
            }
        }

        $crate::macros::flag_operators! {
            $ty {
                BitOr::bitor, BitOrAssign::bitor_assign => union,
                BitAnd::bitand, BitAndAssign::bitand_assign => intersection,
                Sub::sub, SubAssign::sub_assign => difference,
            }
        }
    };
}

macro_rules! flag_operators {
    {
        $ty:ident {
            $( $op:ident::$op_fn:ident, $assign:ident::$assign_fn:ident => $method:ident, )+
        }
    } => {
        $(
            impl std::ops::$op for $ty {
                type Output = Self;

                #[inline]
                fn $op_fn(self, rhs: Self) -> Self {
                    self.$method(rhs)
                }
            }

            impl std::ops::$assign for $ty {
                #[inline]
                fn $assign_fn(&mut self, rhs: Self) {
                    *self = self.$method(rhs);
                }
            }
        )+
    };
}

/// Declares a fieldless enum whose discriminants are the values of the given `ash::vk` type.
/// Variants may carry attributes, such as `#[default]`.
macro_rules! vulkan_enum {
    {
        $(#[doc = $ty_doc:literal])*
        $ty:ident = $ty_ffi:ident($repr:ty);

        $(
            $(#[$variant_attr:meta])*
            $variant:ident = $variant_ffi:ident,
        )+
    } => {
        $(#[doc = $ty_doc])*
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
        #[repr($repr)]
        pub enum $ty {
            $(
                $(#[$variant_attr])*
                $variant = ash::vk::$ty_ffi::$variant_ffi.as_raw(),
            )+
        }
    };
}

pub(crate) use {flag_operators, vulkan_bitflags, vulkan_enum};
