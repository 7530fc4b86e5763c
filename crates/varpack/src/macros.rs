//! Interface snapshots.
//!
//! A trait object crosses the wire as the values its methods return, never as
//! a live reference. `snapshot!` declares such a trait together with the
//! record that stands in for it after decoding.

/// Declares a wire-transmissible interface.
///
/// ```
/// varpack::snapshot! {
///     /// Something with a name and an area.
///     pub trait Shape => ShapeSnapshot {
///         fn name(&self) -> String;
///         fn area(&self) -> f64;
///     }
/// }
/// ```
///
/// This expands to:
///
/// - the trait itself (with `Send + Sync` supertraits);
/// - `ShapeSnapshot`, a plain record with one field per method, which
///   implements the trait by returning clones of those fields;
/// - `Pack for dyn Shape`, which calls every method once, in declaration
///   order, and packs the results;
/// - `Unpack for Box<dyn Shape>`, which rebuilds a `ShapeSnapshot`.
///
/// Nil-ness comes from the usual pointer encoding: use
/// `Option<Box<dyn Shape>>` for a nullable interface value.
#[macro_export]
macro_rules! snapshot {
    (
        $(#[$meta:meta])*
        $vis:vis trait $name:ident => $snap:ident {
            $(
                $(#[$mmeta:meta])*
                fn $method:ident(&self) -> $ret:ty;
            )*
        }
    ) => {
        $(#[$meta])*
        $vis trait $name: ::core::marker::Send + ::core::marker::Sync {
            $(
                $(#[$mmeta])*
                fn $method(&self) -> $ret;
            )*
        }

        #[doc = concat!("Frozen values of a `", stringify!($name), "`, as captured at encode time.")]
        #[derive(Debug, Clone)]
        $vis struct $snap {
            $( pub $method: $ret, )*
        }

        impl $name for $snap {
            $(
                fn $method(&self) -> $ret {
                    ::core::clone::Clone::clone(&self.$method)
                }
            )*
        }

        impl $crate::Pack for dyn $name {
            fn pack(&self, enc: &mut $crate::Encoder) -> $crate::Result<()> {
                $( $crate::Pack::pack(&self.$method(), enc)?; )*
                Ok(())
            }
        }

        #[$crate::async_trait]
        impl $crate::Unpack for ::std::boxed::Box<dyn $name> {
            async fn unpack(dec: &mut $crate::Decoder) -> $crate::Result<Self> {
                $(
                    let $method = <$ret as $crate::Unpack>::unpack(dec)
                        .await
                        .map_err(|e| $crate::Error::field(stringify!($method), stringify!($ret), e))?;
                )*
                Ok(::std::boxed::Box::new($snap { $( $method, )* }))
            }
        }
    };
}
