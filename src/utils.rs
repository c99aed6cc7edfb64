/// Declares a struct whose `Default` impl takes each field's `= expr`, or
/// the field type's own default when none is given. Used for the bot's
/// configuration and per-channel settings.
///
/// ```ignore
/// default_struct! {
/// pub struct Limits {
///     pub max_users: u32 = 99,
///     pub locked: bool,
/// }
/// }
/// ```
#[macro_export]
macro_rules! default_struct {
    (
        $(#[$struct_meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                $field_vis:vis $field:ident : $type:ty $(= $default:expr)?
            ),* $(,)?
        }
    ) => {
        $(#[$struct_meta])*
        $vis struct $name {
            $(
                $(#[$field_meta])*
                $field_vis $field: $type
            ),*
        }

        impl Default for $name {
            fn default() -> Self {
                Self {
                    $(
                        $field: $crate::default_struct!(@default $($default)?)
                    ),*
                }
            }
        }
    };
    (@default) => {
        Default::default()
    };
    (@default $expr:expr) => {
        $expr
    };
}
