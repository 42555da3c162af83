use iconx_image::Instruction;

/// Counters for the dispatch loop and the memory manager.
///
/// Collection is best-effort and meant for profiling. The interpreter runs with metrics disabled
/// unless [`crate::VmConfig::metrics`] is set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VmMetrics {
    /// Total number of executed instructions.
    pub executed_instructions: u64,

    pub const_instructions: u64,
    pub variable_instructions: u64,
    pub frame_instructions: u64,
    pub operator_instructions: u64,
    pub other_instructions: u64,

    /// Calls of Icon procedures, builtin functions and record constructors.
    pub invocations: u64,
    /// Generator frames pushed (expression, procedure and builtin suspensions).
    pub suspensions: u64,
    /// Generator frames resumed by backtracking.
    pub resumptions: u64,
    pub coexpr_switches: u64,
    pub coexprs_created: u64,

    pub collections: u64,
    pub block_bytes_reclaimed: u64,
    pub string_bytes_reclaimed: u64,
    pub static_bytes_reclaimed: u64,

    /// Maximum observed stack length, in slots.
    pub max_stack_len: u64,
}

impl VmMetrics {
    pub(crate) fn record(&mut self, instr: &Instruction) {
        use Instruction as I;

        self.executed_instructions = self.executed_instructions.saturating_add(1);

        match instr {
            I::Int(_) | I::Real(_) | I::Str(_) | I::Cset(_) | I::Pnull | I::Push1 | I::Pushn1 => {
                self.const_instructions += 1
            }

            I::Global(_) | I::Static(_) | I::Local(_) | I::Arg(_) | I::Keywd(_) => {
                self.variable_instructions += 1
            }

            I::Mark(_)
            | I::Mark0
            | I::Unmark
            | I::Eret
            | I::Efail
            | I::Esusp
            | I::Lsusp
            | I::Limit
            | I::Pret
            | I::Pfail
            | I::Psusp
            | I::Chfail(_) => self.frame_instructions += 1,

            I::Op(_) => self.operator_instructions += 1,

            _ => self.other_instructions += 1,
        }
    }

    /// Adds all counters from `other` into `self` (saturating where appropriate).
    pub fn add_from(&mut self, other: &Self) {
        self.executed_instructions = self
            .executed_instructions
            .saturating_add(other.executed_instructions);

        self.const_instructions = self
            .const_instructions
            .saturating_add(other.const_instructions);
        self.variable_instructions = self
            .variable_instructions
            .saturating_add(other.variable_instructions);
        self.frame_instructions = self
            .frame_instructions
            .saturating_add(other.frame_instructions);
        self.operator_instructions = self
            .operator_instructions
            .saturating_add(other.operator_instructions);
        self.other_instructions = self
            .other_instructions
            .saturating_add(other.other_instructions);

        self.invocations = self.invocations.saturating_add(other.invocations);
        self.suspensions = self.suspensions.saturating_add(other.suspensions);
        self.resumptions = self.resumptions.saturating_add(other.resumptions);
        self.coexpr_switches = self.coexpr_switches.saturating_add(other.coexpr_switches);
        self.coexprs_created = self.coexprs_created.saturating_add(other.coexprs_created);

        self.collections = self.collections.saturating_add(other.collections);
        self.block_bytes_reclaimed = self
            .block_bytes_reclaimed
            .saturating_add(other.block_bytes_reclaimed);
        self.string_bytes_reclaimed = self
            .string_bytes_reclaimed
            .saturating_add(other.string_bytes_reclaimed);
        self.static_bytes_reclaimed = self
            .static_bytes_reclaimed
            .saturating_add(other.static_bytes_reclaimed);

        self.max_stack_len = self.max_stack_len.max(other.max_stack_len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instructions_are_bucketed() {
        let mut m = VmMetrics::default();
        m.record(&Instruction::Int(1));
        m.record(&Instruction::Local(0));
        m.record(&Instruction::Mark0);
        m.record(&Instruction::Op(iconx_image::Operator::Plus));
        m.record(&Instruction::Quit);
        assert_eq!(m.executed_instructions, 5);
        assert_eq!(m.const_instructions, 1);
        assert_eq!(m.variable_instructions, 1);
        assert_eq!(m.frame_instructions, 1);
        assert_eq!(m.operator_instructions, 1);
        assert_eq!(m.other_instructions, 1);

        let mut total = VmMetrics {
            max_stack_len: 40,
            ..VmMetrics::default()
        };
        total.add_from(&m);
        assert_eq!(total.executed_instructions, 5);
        assert_eq!(total.max_stack_len, 40);
    }
}
