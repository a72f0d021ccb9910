//! Derive users from collected pages, votes and attributions.

use std::collections::{BTreeMap, HashMap};

use crate::model::{DerivedUser, PageSummary, UserRef, UserRole, VoteEvent};

/// Build the user list. Pure; no I/O.
///
/// Creators get `pagesCreated` and the author role, voters get
/// `totalVotesGiven` and the voter role (crediting `totalVotesReceived` to the
/// page creator), and attributed users get the contributor role. Output is
/// sorted by wikidot id.
pub fn consolidate<'a>(
    pages: &[PageSummary],
    votes: impl IntoIterator<Item = &'a VoteEvent>,
) -> Vec<DerivedUser> {
    let mut users: BTreeMap<String, DerivedUser> = BTreeMap::new();
    let mut creators: HashMap<&str, &str> = HashMap::new();

    for page in pages {
        if let Some(creator) = &page.created_by {
            let user = ensure(&mut users, creator);
            user.pages_created += 1;
            user.roles.insert(UserRole::Author);
            creators.insert(page.url.as_str(), creator.wikidot_id.as_str());
        }
    }

    for vote in votes {
        let voter = ensure_id(&mut users, &vote.voter_id, vote.voter_display_name.as_deref());
        voter.total_votes_given += 1;
        voter.roles.insert(UserRole::Voter);

        if let Some(creator_id) = creators.get(vote.page_url.as_str())
            && let Some(creator) = users.get_mut(*creator_id)
        {
            creator.total_votes_received += 1;
        }
    }

    for page in pages {
        for user in page.attributions.iter().filter_map(|a| a.user.as_ref()) {
            ensure(&mut users, user).roles.insert(UserRole::Contributor);
        }
    }

    users.into_values().collect()
}

fn ensure<'u>(users: &'u mut BTreeMap<String, DerivedUser>, user: &UserRef) -> &'u mut DerivedUser {
    ensure_id(users, &user.wikidot_id, user.display_name.as_deref())
}

fn ensure_id<'u>(
    users: &'u mut BTreeMap<String, DerivedUser>,
    wikidot_id: &str,
    display_name: Option<&str>,
) -> &'u mut DerivedUser {
    let user = users
        .entry(wikidot_id.to_string())
        .or_insert_with(|| DerivedUser::new(wikidot_id));
    if user.display_name.is_none()
        && let Some(name) = display_name
    {
        user.display_name = Some(name.to_string());
    }
    user
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Attribution;
    use crate::model::fixtures::{page, vote};

    fn user(id: &str, name: &str) -> UserRef {
        UserRef {
            wikidot_id: id.to_string(),
            display_name: Some(name.to_string()),
        }
    }

    #[test]
    fn derives_roles_and_counters() {
        let mut a = page("http://wiki/a", 2, 3);
        a.created_by = Some(user("1", "Author One"));
        a.attributions.push(Attribution {
            page_url: a.url.clone(),
            kind: "TRANSLATOR".to_string(),
            user: Some(user("3", "Three")),
            date: None,
            order: 0,
        });
        let mut b = page("http://wiki/b", 1, 1);
        b.created_by = Some(user("1", "Author One"));
        let c = page("http://wiki/c", 1, 1);

        let votes = vec![
            vote(&a.url, "2", 1, 1),
            vote(&a.url, "3", 2, 1),
            vote(&a.url, "1", 3, -1),
            vote(&b.url, "2", 4, 1),
            vote(&c.url, "2", 5, 1),
        ];

        let users = consolidate(&[a, b, c], &votes);
        let by_id: HashMap<&str, &DerivedUser> =
            users.iter().map(|u| (u.wikidot_id.as_str(), u)).collect();

        let one = by_id["1"];
        assert_eq!(one.pages_created, 2);
        assert_eq!(one.total_votes_received, 4);
        assert_eq!(one.total_votes_given, 1);
        assert!(one.roles.contains(&UserRole::Author));
        assert!(one.roles.contains(&UserRole::Voter));
        assert_eq!(one.display_name.as_deref(), Some("Author One"));

        let two = by_id["2"];
        assert_eq!(two.total_votes_given, 3);
        assert_eq!(two.roles.len(), 1);
        assert_eq!(two.display_name.as_deref(), Some("user 2"));

        let three = by_id["3"];
        assert!(three.roles.contains(&UserRole::Contributor));
        assert!(three.roles.contains(&UserRole::Voter));

        let ids: Vec<&str> = users.iter().map(|u| u.wikidot_id.as_str()).collect();
        assert_eq!(ids, ["1", "2", "3"]);
    }

    #[test]
    fn pages_without_creator_credit_nobody() {
        let a = page("http://wiki/a", 1, 1);
        let votes = vec![vote(&a.url, "5", 1, 1)];
        let users = consolidate(&[a], &votes);
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].total_votes_received, 0);
    }

    #[test]
    fn empty_input_yields_no_users() {
        assert!(consolidate(&[], &Vec::<VoteEvent>::new()).is_empty());
    }
}
