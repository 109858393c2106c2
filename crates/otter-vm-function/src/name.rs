//! Display names of function objects

use crate::descriptor::FunctionDescriptor;
use crate::value::Value;

/// Name shown for a function: the computed name when one was set, else the
/// declared name, prefixed with `get `/`set ` for accessors.
///
/// Symbol-keyed names render as `[description]`.
pub fn display_name(descriptor: &FunctionDescriptor, computed_name: Option<&Value>) -> String {
    let base = match computed_name.filter(|name| !name.is_undefined()) {
        Some(name) => match name.as_symbol() {
            Some(symbol) => format!("[{}]", symbol.description.as_deref().unwrap_or("")),
            None => name.to_display_string(),
        },
        None => descriptor.name.as_deref().unwrap_or("").to_owned(),
    };

    let flags = descriptor.flags;
    if flags.is_getter {
        format!("get {base}")
    } else if flags.is_setter {
        format!("set {base}")
    } else {
        base
    }
}

/// A function is anonymous when declared without a name and no computed
/// name has been assigned.
pub fn is_anonymous(descriptor: &FunctionDescriptor, computed_name: Option<&Value>) -> bool {
    let has_computed = computed_name.is_some_and(|name| !name.is_undefined());
    !has_computed && (descriptor.flags.is_anonymous || descriptor.name.is_none())
}
