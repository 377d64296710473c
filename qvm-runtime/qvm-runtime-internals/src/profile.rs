use crate::instance::Instance;
use std::fmt;

/// Call statistics for one module function.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProfileEntry {
    pub ordinal: usize,
    /// Instruction index of the function's `ENTER`.
    pub entry: usize,
    pub name: Option<String>,
    pub calls: u32,
}

impl fmt::Display for ProfileEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name {
            Some(ref name) => write!(f, "{:>10} {}", self.calls, name),
            None => write!(f, "{:>10} {:#x}", self.calls, self.entry),
        }
    }
}

impl Instance {
    /// Per-function call counts since the instance was created, busiest first.
    pub fn profile(&self) -> Vec<ProfileEntry> {
        let module = self.module();
        let mut entries: Vec<ProfileEntry> = module
            .functions()
            .iter()
            .map(|f| ProfileEntry {
                ordinal: f.ordinal,
                entry: f.entry,
                name: module.symbols().at(f.entry).map(|s| s.name.clone()),
                calls: self.counters.calls(f.ordinal),
            })
            .collect();
        entries.sort_by(|a, b| b.calls.cmp(&a.calls).then(a.entry.cmp(&b.entry)));
        entries
    }

    /// Zeroes the call counters and the break count.
    pub fn clear_profile(&mut self) {
        self.counters.clear();
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{Config, Engine};
    use crate::instance::Instance;
    use crate::vmctx::NoSyscalls;
    use qvm_module::builder::ImageBuilder;
    use qvm_module::Opcode;
    use std::sync::Arc;

    #[test]
    fn busiest_function_first() {
        let mut b = ImageBuilder::new();
        b.function("vmMain", 8)
            .call("leaf")
            .call("leaf")
            .op(Opcode::Add)
            .call("other")
            .op(Opcode::Add)
            .leave();
        b.function("leaf", 8).constant(1).leave();
        b.function("other", 8).constant(2).leave();
        let config = Config::default().with_engine(Engine::Interpreted);
        let mut inst = Instance::new("profile", Arc::new(b.module().unwrap()), &config).unwrap();
        assert_eq!(inst.call(&mut NoSyscalls, 0, []).unwrap(), 4);

        let profile = inst.profile();
        let summary: Vec<_> = profile
            .iter()
            .map(|e| (e.name.as_deref().unwrap(), e.calls))
            .collect();
        assert_eq!(summary, vec![("leaf", 2), ("vmMain", 1), ("other", 1)]);
        assert_eq!(profile[0].to_string().trim(), "2 leaf");

        inst.clear_profile();
        assert!(inst.profile().iter().all(|e| e.calls == 0));
    }
}
