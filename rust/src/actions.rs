#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallAction {
    /// Ring a contact by relay identity.
    StartCall {
        identity: String,
    },
    AcceptCall,
    /// Hang up an incoming call that is still ringing.
    DeclineCall,
    HangUp,

    // UI
    ClearToast,
}

impl CallAction {
    /// Log-safe action tag.
    pub fn tag(&self) -> &'static str {
        match self {
            CallAction::StartCall { .. } => "StartCall",
            CallAction::AcceptCall => "AcceptCall",
            CallAction::DeclineCall => "DeclineCall",
            CallAction::HangUp => "HangUp",
            CallAction::ClearToast => "ClearToast",
        }
    }
}
