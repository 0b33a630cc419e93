use std::collections::BTreeMap;

use crate::User;

/// One action a user may or may not take on a record of type `T`.
pub struct Capability<T: Permissible> {
    pub action: &'static str,
    pub check: fn(&T, &T::Ctx, &User) -> bool,
}

/// Per-type capability table, evaluated uniformly so presentation code can
/// render what a user may do with a record without knowing its type.
pub trait Permissible: Sized + 'static {
    /// Collaborating data the checks need; `()` when the record stands alone.
    type Ctx;

    fn capability_table() -> &'static [Capability<Self>];

    /// Evaluates every capability for `user`. All checks run, even those the
    /// immediate caller does not care about, and types without capabilities
    /// yield an empty mapping.
    fn permissions_for(&self, ctx: &Self::Ctx, user: &User) -> BTreeMap<&'static str, bool> {
        Self::capability_table()
            .iter()
            .map(|cap| (cap.action, (cap.check)(self, ctx, user)))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use crate::{Award, Badge, Permissible, User};

    #[test]
    fn test_badge_and_award_expose_no_capabilities() {
        let mut creator = User::new("alice", "alice@example.com");
        creator.id = 1;
        let mut badge = Badge::new(&creator, "Pythonista");
        badge.id = 2;
        let award = Award::new(&badge, &creator, &creator, None);

        assert!(badge.permissions_for(&(), &creator).is_empty());
        assert!(award.permissions_for(&(), &creator).is_empty());
    }
}
