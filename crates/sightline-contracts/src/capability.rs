/// One perception task the backend can run against a frame.
///
/// `Hazard` shares the object-detection adapter and differs only in the
/// `feature_id` reported back to the client; `Focus` is object detection
/// constrained to a single named target and is never chosen by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Object,
    Hazard,
    Scene,
    Text,
    Currency,
    Focus,
}

impl Capability {
    pub const ALL: [Capability; 6] = [
        Capability::Object,
        Capability::Hazard,
        Capability::Scene,
        Capability::Text,
        Capability::Currency,
        Capability::Focus,
    ];

    /// Fixed priority order for router-reply keyword scanning. The first
    /// token found in a noisy reply wins; `Focus` is deliberately absent.
    pub const ROUTE_PRIORITY: [Capability; 5] = [
        Capability::Object,
        Capability::Hazard,
        Capability::Scene,
        Capability::Text,
        Capability::Currency,
    ];

    pub fn from_wire(token: &str) -> Option<Capability> {
        match token {
            "object" => Some(Capability::Object),
            "hazard" => Some(Capability::Hazard),
            "scene" => Some(Capability::Scene),
            "text" => Some(Capability::Text),
            "currency" => Some(Capability::Currency),
            "focus" => Some(Capability::Focus),
            _ => None,
        }
    }

    pub fn wire_token(self) -> &'static str {
        match self {
            Capability::Object => "object",
            Capability::Hazard => "hazard",
            Capability::Scene => "scene",
            Capability::Text => "text",
            Capability::Currency => "currency",
            Capability::Focus => "focus",
        }
    }

    /// Identifier reported in the response envelope and used verbatim as
    /// the router vocabulary.
    pub fn feature_id(self) -> &'static str {
        match self {
            Capability::Object => "object_detection",
            Capability::Hazard => "hazard_detection",
            Capability::Scene => "scene_detection",
            Capability::Text => "text_detection",
            Capability::Currency => "currency_detection",
            Capability::Focus => "focus_detection",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Capability;

    #[test]
    fn wire_tokens_round_trip() {
        for capability in Capability::ALL {
            assert_eq!(
                Capability::from_wire(capability.wire_token()),
                Some(capability)
            );
        }
    }

    #[test]
    fn unknown_wire_token_is_rejected() {
        assert_eq!(Capability::from_wire("auto"), None);
        assert_eq!(Capability::from_wire("object_detection"), None);
        assert_eq!(Capability::from_wire(""), None);
    }

    #[test]
    fn route_priority_starts_with_object_and_excludes_focus() {
        assert_eq!(Capability::ROUTE_PRIORITY[0], Capability::Object);
        assert!(!Capability::ROUTE_PRIORITY.contains(&Capability::Focus));
    }

    #[test]
    fn feature_ids_are_unique() {
        for (index, capability) in Capability::ALL.iter().enumerate() {
            for other in &Capability::ALL[index + 1..] {
                assert_ne!(capability.feature_id(), other.feature_id());
            }
        }
    }
}
