//! Per-destination message filtering.
//!
//! Checks run in a fixed order and the first failing check rejects:
//! chat type, phone list, group JID list, group name list. Each filter is
//! optional; the ones that are configured are ANDed together.

use crate::types::{ChatTypeFilter, Filters, MessageData, PhoneMatchType};

/// Decide whether a destination with `filters` should receive `message`.
pub fn should_deliver(filters: &Filters, message: &MessageData) -> bool {
    match filters.chat_type {
        ChatTypeFilter::All => {}
        ChatTypeFilter::Individual if message.is_group => return false,
        ChatTypeFilter::Group if !message.is_group => return false,
        _ => {}
    }

    if !phone_allowed(&message.sender_phone, &filters.phone_numbers, filters.phone_match_type) {
        return false;
    }

    if message.is_group {
        if !filters.group_jids.is_empty()
            && !contains_ignore_case(&filters.group_jids, message.group_id.as_deref())
        {
            return false;
        }

        if !filters.group_names.is_empty()
            && !contains_ignore_case(&filters.group_names, message.group_name.as_deref())
        {
            return false;
        }
    }

    true
}

/// Apply the phone list in the given mode. An empty list allows everyone.
pub fn phone_allowed(phone: &str, list: &[String], mode: PhoneMatchType) -> bool {
    if list.is_empty() {
        return true;
    }

    let listed = phone_matches(phone, list);
    match mode {
        PhoneMatchType::Whitelist => listed,
        PhoneMatchType::Blacklist => !listed,
    }
}

/// True if `phone` equals any listed number after normalization.
pub fn phone_matches(phone: &str, list: &[String]) -> bool {
    let wanted = normalize_phone(phone);
    list.iter().any(|candidate| normalize_phone(candidate) == wanted)
}

/// Strip everything but ASCII digits.
pub fn normalize_phone(phone: &str) -> String {
    phone.chars().filter(char::is_ascii_digit).collect()
}

fn contains_ignore_case(list: &[String], value: Option<&str>) -> bool {
    let Some(value) = value else {
        return false;
    };
    list.iter().any(|item| item.to_lowercase() == value.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct(phone: &str) -> MessageData {
        MessageData {
            sender_id: phone.to_string(),
            sender_phone: phone.to_string(),
            content: "hello".to_string(),
            message_id: "MSG1".to_string(),
            ..Default::default()
        }
    }

    fn group(phone: &str, jid: &str, name: &str) -> MessageData {
        MessageData {
            is_group: true,
            group_id: Some(jid.to_string()),
            group_name: Some(name.to_string()),
            ..direct(phone)
        }
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn default_filters_accept_everything() {
        let filters = Filters::default();
        assert!(should_deliver(&filters, &direct("15550001111")));
        assert!(should_deliver(&filters, &group("15550001111", "123@g.us", "Ops")));
    }

    #[test]
    fn individual_filter_rejects_groups() {
        let filters = Filters {
            chat_type: ChatTypeFilter::Individual,
            ..Default::default()
        };
        assert!(!should_deliver(&filters, &group("1", "123@g.us", "Ops")));
        assert!(should_deliver(&filters, &direct("1")));
    }

    #[test]
    fn group_filter_without_group_lists_fires_for_every_group() {
        let filters = Filters {
            chat_type: ChatTypeFilter::Group,
            ..Default::default()
        };
        assert!(!should_deliver(&filters, &direct("1")));
        assert!(should_deliver(&filters, &group("1", "a@g.us", "Anything")));
        assert!(should_deliver(&filters, &group("1", "b@g.us", "Else")));
    }

    #[test]
    fn whitelist_matches_after_normalization() {
        let filters = Filters {
            phone_numbers: strings(&["+1 234-567-8900"]),
            phone_match_type: PhoneMatchType::Whitelist,
            ..Default::default()
        };
        assert!(should_deliver(&filters, &direct("12345678900")));
        assert!(!should_deliver(&filters, &direct("19998887777")));
    }

    #[test]
    fn blacklist_rejects_listed_numbers() {
        let filters = Filters {
            phone_numbers: strings(&["(555) 000-1111"]),
            phone_match_type: PhoneMatchType::Blacklist,
            ..Default::default()
        };
        assert!(!should_deliver(&filters, &direct("5550001111")));
        assert!(should_deliver(&filters, &direct("5550002222")));
    }

    #[test]
    fn whitelist_and_blacklist_are_complements_for_non_empty_lists() {
        let list = strings(&["+44 20 7946 0000", "1-800-555-0199"]);
        for phone in ["442079460000", "18005550199", "123", "", "+44 (20) 7946-0000"] {
            assert_eq!(
                phone_allowed(phone, &list, PhoneMatchType::Whitelist),
                !phone_allowed(phone, &list, PhoneMatchType::Blacklist),
                "phone {phone}"
            );
        }
    }

    #[test]
    fn empty_phone_list_allows_in_both_modes() {
        for phone in ["12345", ""] {
            assert!(phone_allowed(phone, &[], PhoneMatchType::Whitelist));
            assert!(phone_allowed(phone, &[], PhoneMatchType::Blacklist));
        }
    }

    #[test]
    fn group_jid_and_name_are_case_insensitive() {
        let filters = Filters {
            group_jids: strings(&["ABC@g.us"]),
            group_names: strings(&["Ops Team"]),
            ..Default::default()
        };
        assert!(should_deliver(&filters, &group("1", "abc@G.US", "ops team")));
        assert!(!should_deliver(&filters, &group("1", "other@g.us", "Ops Team")));
        assert!(!should_deliver(&filters, &group("1", "abc@g.us", "Sales")));
    }

    #[test]
    fn group_lists_ignore_direct_messages() {
        let filters = Filters {
            group_jids: strings(&["abc@g.us"]),
            group_names: strings(&["Ops"]),
            ..Default::default()
        };
        assert!(should_deliver(&filters, &direct("1")));
    }

    #[test]
    fn group_without_known_name_fails_name_filter() {
        let filters = Filters {
            group_names: strings(&["Ops"]),
            ..Default::default()
        };
        let mut message = group("1", "abc@g.us", "Ops");
        message.group_name = None;
        assert!(!should_deliver(&filters, &message));
    }

    #[test]
    fn list_entries_may_contain_commas() {
        let filters = Filters {
            group_names: strings(&["Smith, Jones & Co"]),
            ..Default::default()
        };
        assert!(should_deliver(&filters, &group("1", "x@g.us", "smith, jones & co")));
        assert!(!should_deliver(&filters, &group("1", "x@g.us", "Smith")));
    }

    #[test]
    fn evaluation_is_repeatable() {
        let filters = Filters {
            chat_type: ChatTypeFilter::Group,
            phone_numbers: strings(&["123"]),
            group_names: strings(&["Ops"]),
            ..Default::default()
        };
        let message = group("123", "a@g.us", "Ops");
        let first = should_deliver(&filters, &message);
        for _ in 0..10 {
            assert_eq!(should_deliver(&filters, &message), first);
        }
    }
}
