use super::*;

#[test]
fn test_usable_host_filter() {
    assert!(!is_usable_host(&Ipv4Addr::new(127, 0, 0, 1)));
    assert!(!is_usable_host(&Ipv4Addr::new(169, 254, 1, 1)));
    assert!(!is_usable_host(&Ipv4Addr::new(0, 0, 0, 0)));
    assert!(!is_usable_host(&Ipv4Addr::new(255, 255, 255, 255)));
    assert!(is_usable_host(&Ipv4Addr::new(192, 168, 1, 10)));
    assert!(is_usable_host(&Ipv4Addr::new(10, 20, 30, 40)));
}

#[test]
fn test_same_subnet24() {
    let a = Ipv4Addr::new(192, 168, 1, 10);
    assert!(same_subnet24(&a, &Ipv4Addr::new(192, 168, 1, 200)));
    assert!(!same_subnet24(&a, &Ipv4Addr::new(192, 168, 2, 10)));
}

#[test]
fn test_allow_list_is_authoritative() {
    let allowed = [
        Ipv4Addr::new(10, 1, 2, 3),
        // Explicitly allowed loopback survives, for same-machine use.
        Ipv4Addr::new(127, 0, 0, 1),
        Ipv4Addr::new(0, 0, 0, 0),
    ];
    assert_eq!(
        host_ips(&allowed),
        vec![Ipv4Addr::new(10, 1, 2, 3), Ipv4Addr::new(127, 0, 0, 1)]
    );
}
