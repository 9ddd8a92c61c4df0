//! String translation.
//!
//! Templates carry `%1..%n` placeholders filled from event arguments.

use std::collections::HashMap;

/// Translates string ids into text.
#[derive(Debug, Clone, Default)]
pub struct Translator {
    templates: HashMap<u32, String>,
}

impl Translator {
    pub fn new(templates: HashMap<u32, String>) -> Self {
        Self { templates }
    }

    pub fn contains(&self, id: u32) -> bool {
        self.templates.contains_key(&id)
    }

    /// Fill the template for `id`.
    ///
    /// Placeholders are replaced from the highest index down so `%1` never
    /// eats the prefix of `%10`. Placeholders without an argument stay
    /// as they are. Unknown ids translate to a generic text listing the
    /// arguments.
    pub fn translate(&self, id: u32, args: &[String]) -> String {
        let Some(template) = self.templates.get(&id) else {
            return if args.is_empty() {
                format!("String {}", id)
            } else {
                format!("String {}: {}", id, args.join(", "))
            };
        };

        let mut text = template.clone();
        for (index, arg) in args.iter().enumerate().rev() {
            text = text.replace(&format!("%{}", index + 1), arg);
        }
        text
    }
}
