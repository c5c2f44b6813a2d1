// Interned in one pipelined pass; a single failed reply fails the whole set.
x11rb::atom_manager! {
    pub Atoms: AtomsCookie {
        _NET_SYSTEM_TRAY_S0,
        _NET_SYSTEM_TRAY_OPCODE,
        MANAGER,
        _XEMBED,
        _XEMBED_INFO,
        WM_NAME,
        _NET_WM_NAME,
        UTF8_STRING,
        _NET_WM_ICON,
    }
}

impl Atoms {
    /// Whether `atom` names one of the window title properties.
    pub fn is_title(&self, atom: x11rb::protocol::xproto::Atom) -> bool {
        atom == self._NET_WM_NAME || atom == self.WM_NAME
    }
}
