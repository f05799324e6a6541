/// Three-valued outcome for a per-packet send/receive hook (spec §7): a
/// component boundary never panics or aborts the whole transport on a
/// single bad packet. `Process` continues the normal path, `Ignore` drops
/// just this packet, `Abort` escalates to transport-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketAction {
    Process,
    Ignore,
    Abort,
}

impl PacketAction {
    pub fn is_abort(&self) -> bool {
        matches!(self, PacketAction::Abort)
    }

    pub fn should_process(&self) -> bool {
        matches!(self, PacketAction::Process)
    }
}
