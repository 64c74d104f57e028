use slotmap::new_key_type;

new_key_type! {
    pub struct EnvironmentId;
    pub struct PairModelId;
    pub struct GroupModelId;
    pub struct PairEnergyId;
    pub struct GroupEnergyId;
    pub struct TransitionId;
    pub struct MappingId;
    pub struct RuleId;
}
