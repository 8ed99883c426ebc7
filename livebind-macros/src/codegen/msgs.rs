// 编译期诊断文案集中放置

pub(super) const ERR_ORDERING_UNKNOWN_ARG: &str = "#[ordering] only accepts `name = \"...\"`";
pub(super) const ERR_ORDERING_ASYNC: &str = "#[ordering] comparator cannot be async";
pub(super) const ERR_ORDERING_GENERIC: &str = "#[ordering] comparator cannot be generic";
pub(super) const ERR_ORDERING_ARITY: &str =
    "#[ordering] comparator must take exactly two parameters: (&Handle, &Handle)";
pub(super) const ERR_ORDERING_SELF: &str = "#[ordering] comparator must be a free function, not a method";
pub(super) const ERR_ORDERING_EMPTY_NAME: &str = "#[ordering] name cannot be empty";
